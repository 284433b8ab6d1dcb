//! Request dispatch with fallback, streaming and cost accounting

pub mod engine;
pub mod error;
pub mod pricing;
pub mod route;
pub mod stream;

pub use engine::{DispatchEngine, DispatchEngineBuilder, DispatchPlan, DispatchResult, EmbeddingResult};
pub use error::{AttemptOutcome, AttemptRecord, DispatchError};
pub use pricing::{ModelPricing, PricingError, PricingTable, DEFAULT_RATE};
pub use route::{DispatchSettings, RoutePolicy};
pub use stream::{DispatchStream, StreamError, StreamEvent, StreamSummary, SSE_DONE};
