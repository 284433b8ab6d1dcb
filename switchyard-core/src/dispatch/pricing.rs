//! Static per-model pricing and cost calculation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// Price per 1,000 tokens, in dollars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPricing {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// `prompt/1000 * input + completion/1000 * output`
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        f64::from(prompt_tokens) / 1000.0 * self.input_per_1k
            + f64::from(completion_tokens) / 1000.0 * self.output_per_1k
    }
}

/// Rate applied to models that match no family key
pub const DEFAULT_RATE: ModelPricing = ModelPricing::new(0.001, 0.002);

const BUILTIN_PRICING: &[(&str, ModelPricing)] = &[
    ("gpt-4o-mini", ModelPricing::new(0.00015, 0.0006)),
    ("gpt-4o", ModelPricing::new(0.005, 0.015)),
    ("gpt-4-turbo", ModelPricing::new(0.01, 0.03)),
    ("gpt-4", ModelPricing::new(0.03, 0.06)),
    ("gpt-3.5-turbo", ModelPricing::new(0.0005, 0.0015)),
    ("claude-3-opus", ModelPricing::new(0.015, 0.075)),
    ("claude-3-5-sonnet", ModelPricing::new(0.003, 0.015)),
    ("claude-3-sonnet", ModelPricing::new(0.003, 0.015)),
    ("claude-3-haiku", ModelPricing::new(0.00025, 0.00125)),
    ("text-embedding-3-small", ModelPricing::new(0.00002, 0.0)),
    ("text-embedding-3-large", ModelPricing::new(0.00013, 0.0)),
    ("text-embedding-ada-002", ModelPricing::new(0.0001, 0.0)),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("No pricing entry matches model '{model}'")]
    UnknownModel { model: String },
}

/// Model-family pricing table
///
/// A model matches every key it contains (case-insensitive); the longest
/// matching key wins, so `gpt-4o-mini` is not billed as `gpt-4`.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    families: HashMap<String, ModelPricing>,
    default_rate: ModelPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut table = Self::empty(DEFAULT_RATE);
        for (family, pricing) in BUILTIN_PRICING {
            table.insert(*family, *pricing);
        }
        table
    }
}

impl PricingTable {
    /// Table without any family entries
    pub fn empty(default_rate: ModelPricing) -> Self {
        Self {
            families: HashMap::new(),
            default_rate,
        }
    }

    /// Add or replace a family entry
    pub fn insert(&mut self, family: impl Into<String>, pricing: ModelPricing) {
        self.families.insert(family.into().to_lowercase(), pricing);
    }

    pub fn with(mut self, family: impl Into<String>, pricing: ModelPricing) -> Self {
        self.insert(family, pricing);
        self
    }

    pub fn set_default_rate(&mut self, default_rate: ModelPricing) {
        self.default_rate = default_rate;
    }

    pub fn default_rate(&self) -> ModelPricing {
        self.default_rate
    }

    /// Pricing for the longest family key contained in `model`
    pub fn lookup(&self, model: &str) -> Result<ModelPricing, PricingError> {
        let model_lower = model.to_lowercase();
        self.families
            .iter()
            .filter(|(family, _)| model_lower.contains(family.as_str()))
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|(_, pricing)| *pricing)
            .ok_or_else(|| PricingError::UnknownModel {
                model: model.to_string(),
            })
    }

    /// Pricing for `model`, falling back to the default rate
    pub fn rate_for(&self, model: &str) -> ModelPricing {
        self.lookup(model).unwrap_or_else(|err| {
            warn!("{}; using default rate", err);
            self.default_rate
        })
    }

    /// Dollar cost of one call
    pub fn cost(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        self.rate_for(model).cost(prompt_tokens, completion_tokens)
    }
}
