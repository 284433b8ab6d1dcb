//! Per-provider circuit breaker state machine
//!
//! ```text
//! Closed   → Open:     failures within the window reach failure_threshold
//! Open     → HalfOpen: timeout_secs elapsed, observed by can_execute()
//! HalfOpen → Closed:   consecutive successes reach success_threshold
//! HalfOpen → Open:     any failure
//! ```
//!
//! All bookkeeping for one breaker happens under that breaker's own mutex.
//! The lock is never held across a provider call.

use crate::providers::ProviderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Provider assumed down, calls are rejected
    Open,
    /// Testing recovery with a bounded number of probe calls
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Thresholds and timings for one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Seconds an open circuit waits before allowing a probe
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Length of the sliding failure window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Concurrent probe calls allowed while half-open
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_secs: default_timeout_secs(),
            window_secs: default_window_secs(),
            half_open_max_requests: default_half_open_max_requests(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Open-state timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Failure window as a duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_failure_threshold() -> u32 { 5 }
fn default_success_threshold() -> u32 { 2 }
fn default_timeout_secs() -> u64 { 60 }
fn default_window_secs() -> u64 { 60 }
fn default_half_open_max_requests() -> u32 { 3 }

/// Counters owned by one breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub failure_count: u64,
    pub success_count: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_time: Option<Instant>,
    pub last_success_time: Option<Instant>,
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub state_changed_at: Instant,
    /// Timestamps of recent failures, oldest first
    pub failure_window: VecDeque<Instant>,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<f64>,
}

impl CircuitBreakerMetrics {
    fn new(now: Instant) -> Self {
        Self {
            failure_count: 0,
            success_count: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            last_success_time: None,
            total_requests: 0,
            rejected_requests: 0,
            state_changed_at: now,
            failure_window: VecDeque::new(),
            last_error: None,
            last_latency_ms: None,
        }
    }

    fn prune_window(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failure_window.front() {
            if now.duration_since(oldest) > window {
                self.failure_window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Read-only view of a breaker, for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub failures_in_window: usize,
    pub half_open_requests: u32,
    pub time_in_state_secs: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<f64>,
    pub config: CircuitBreakerConfig,
}

/// Admission handed out by [`CircuitBreaker::try_acquire`]
///
/// Remembers whether the call took a half-open probe slot, and in which
/// half-open period, so that only real probe completions release a slot or
/// count toward closing the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPermit {
    generation: u64,
    probe: bool,
}

impl BreakerPermit {
    /// Whether this admission took a half-open probe slot
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

struct BreakerInner {
    state: CircuitState,
    metrics: CircuitBreakerMetrics,
    half_open_requests: u32,
    /// Bumped on every state change; survives reset
    generation: u64,
    config: CircuitBreakerConfig,
}

impl BreakerInner {
    fn new(config: CircuitBreakerConfig, generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            metrics: CircuitBreakerMetrics::new(Instant::now()),
            half_open_requests: 0,
            generation,
            config,
        }
    }

    /// Whether a completion should drive half-open bookkeeping
    ///
    /// Untagged completions are trusted; tagged ones must be a probe from the
    /// current half-open period.
    fn is_live_probe(&self, permit: Option<BreakerPermit>) -> bool {
        permit.is_none_or(|p| p.probe && p.generation == self.generation)
    }
}

/// Circuit breaker guarding a single provider
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerInner::new(config, 0)),
        }
    }

    /// Provider this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.metrics.state_changed_at = now;

        match to {
            CircuitState::HalfOpen => {
                inner.half_open_requests = 0;
                inner.metrics.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                inner.half_open_requests = 0;
                inner.metrics.failure_window.clear();
            }
            CircuitState::Open => {
                inner.half_open_requests = 0;
            }
        }

        if from == to {
            return;
        }
        if to == CircuitState::Open {
            warn!(
                provider = %self.name,
                from = %from,
                consecutive_failures = inner.metrics.consecutive_failures,
                "Circuit opened"
            );
        } else {
            info!(provider = %self.name, from = %from, to = %to, "Circuit state changed");
        }
    }

    /// Ask whether a call to this provider may be attempted now
    ///
    /// May move an open breaker to half-open once its timeout has elapsed.
    /// Every `true` while half-open reserves one probe slot, released by the
    /// matching `record_success` / `record_failure`.
    pub fn can_execute(&self) -> bool {
        self.try_acquire().is_some()
    }

    /// [`can_execute`](Self::can_execute) returning a permit for the call
    ///
    /// Settle the call with [`record_success_with`](Self::record_success_with)
    /// or [`record_failure_with`](Self::record_failure_with).
    pub fn try_acquire(&self) -> Option<BreakerPermit> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.metrics.total_requests += 1;

        let probe = match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let elapsed = now.duration_since(inner.metrics.state_changed_at);
                if elapsed >= inner.config.timeout() {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                    inner.half_open_requests += 1;
                    Some(true)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_requests < inner.config.half_open_max_requests {
                    inner.half_open_requests += 1;
                    Some(true)
                } else {
                    None
                }
            }
        };

        match probe {
            Some(probe) => Some(BreakerPermit {
                generation: inner.generation,
                probe,
            }),
            None => {
                inner.metrics.rejected_requests += 1;
                debug!(provider = %self.name, state = %inner.state, "Call rejected by circuit breaker");
                None
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self, latency_ms: f64) {
        self.settle_success(None, latency_ms);
    }

    /// Record a successful call admitted by `permit`
    ///
    /// A call admitted before the current half-open period does not free a
    /// probe slot or count toward closing the circuit.
    pub fn record_success_with(&self, permit: BreakerPermit, latency_ms: f64) {
        self.settle_success(Some(permit), latency_ms);
    }

    /// Record a failed call
    pub fn record_failure(&self, error: &ProviderError) {
        self.settle_failure(None, error);
    }

    /// Record a failed call admitted by `permit`
    ///
    /// A failure from a call admitted before the current half-open period is
    /// counted but does not reopen the circuit.
    pub fn record_failure_with(&self, permit: BreakerPermit, error: &ProviderError) {
        self.settle_failure(Some(permit), error);
    }

    fn settle_success(&self, permit: Option<BreakerPermit>, latency_ms: f64) {
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.state == CircuitState::HalfOpen && !inner.is_live_probe(permit) {
            let metrics = &mut inner.metrics;
            metrics.success_count += 1;
            metrics.last_success_time = Some(now);
            metrics.last_latency_ms = Some(latency_ms);
            debug!(provider = %self.name, "Success from a call admitted before half-open");
            return;
        }

        let metrics = &mut inner.metrics;
        metrics.success_count += 1;
        metrics.consecutive_successes += 1;
        metrics.consecutive_failures = 0;
        metrics.last_success_time = Some(now);
        metrics.last_latency_ms = Some(latency_ms);

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_requests = inner.half_open_requests.saturating_sub(1);
            if inner.metrics.consecutive_successes >= inner.config.success_threshold {
                self.transition(&mut inner, CircuitState::Closed, now);
            }
        }
    }

    fn settle_failure(&self, permit: Option<BreakerPermit>, error: &ProviderError) {
        let mut inner = self.lock();
        let now = Instant::now();
        let window = inner.config.window();

        if inner.state == CircuitState::HalfOpen && !inner.is_live_probe(permit) {
            let metrics = &mut inner.metrics;
            metrics.failure_count += 1;
            metrics.last_failure_time = Some(now);
            metrics.last_error = Some(error.to_string());
            debug!(provider = %self.name, "Failure from a call admitted before half-open");
            return;
        }

        let metrics = &mut inner.metrics;
        metrics.failure_count += 1;
        metrics.consecutive_failures += 1;
        metrics.consecutive_successes = 0;
        metrics.last_failure_time = Some(now);
        metrics.last_error = Some(error.to_string());
        metrics.failure_window.push_back(now);
        metrics.prune_window(now, window);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_requests = inner.half_open_requests.saturating_sub(1);
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Closed => {
                let failures = inner.metrics.failure_window.len();
                if failures >= inner.config.failure_threshold as usize {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Open the circuit now; it stays closed to calls for `timeout_secs`
    pub fn force_open(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Open, Instant::now());
    }

    /// Close the circuit now and forget recent failures
    pub fn force_close(&self) {
        let mut inner = self.lock();
        inner.metrics.consecutive_failures = 0;
        self.transition(&mut inner, CircuitState::Closed, Instant::now());
    }

    /// Restore fresh metrics and the closed state, keeping the config
    pub fn reset(&self) {
        let mut inner = self.lock();
        let config = inner.config.clone();
        let generation = inner.generation + 1;
        *inner = BreakerInner::new(config, generation);
        info!(provider = %self.name, "Circuit breaker reset");
    }

    /// Replace this breaker's config
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        self.lock().config = config;
    }

    /// Current config
    pub fn config(&self) -> CircuitBreakerConfig {
        self.lock().config.clone()
    }

    /// Current state, without any side effects
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Copy of the raw metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.lock().metrics.clone()
    }

    /// Read-only view for reporting
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        let now = Instant::now();
        let wall_now = Utc::now();
        let metrics = &inner.metrics;
        let window = inner.config.window();

        CircuitBreakerSnapshot {
            provider: self.name.clone(),
            state: inner.state,
            failure_count: metrics.failure_count,
            success_count: metrics.success_count,
            consecutive_failures: metrics.consecutive_failures,
            consecutive_successes: metrics.consecutive_successes,
            total_requests: metrics.total_requests,
            rejected_requests: metrics.rejected_requests,
            failures_in_window: metrics
                .failure_window
                .iter()
                .filter(|t| now.duration_since(**t) <= window)
                .count(),
            half_open_requests: inner.half_open_requests,
            time_in_state_secs: now.duration_since(metrics.state_changed_at).as_secs_f64(),
            last_failure_at: metrics.last_failure_time.map(|t| wall_clock(t, now, wall_now)),
            last_success_at: metrics.last_success_time.map(|t| wall_clock(t, now, wall_now)),
            last_error: metrics.last_error.clone(),
            last_latency_ms: metrics.last_latency_ms,
            config: inner.config.clone(),
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

fn wall_clock(at: Instant, now: Instant, wall_now: DateTime<Utc>) -> DateTime<Utc> {
    let age = chrono::Duration::from_std(now.duration_since(at))
        .unwrap_or_else(|_| chrono::Duration::zero());
    wall_now - age
}
