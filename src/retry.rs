//! Retry policy: budgets, backoff strategies, and user hooks.
//!
//! [`RetryPolicy`] separates two budgets: `attempts` caps model-class retries
//! (malformed output, drift, recoverable guardrails), while `max_retries`
//! caps every retry including network-class ones. Network-class retries never
//! consume the model budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::NetworkErrorType;
use crate::error::{ErrorCategory, L0Error};
use crate::state::RunState;

/// Delay growth strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Always `base_delay`.
    Fixed,
    /// `base_delay * (attempt + 1)`.
    Linear,
    /// `base_delay * 2^attempt`.
    Exponential,
    /// `base_delay` plus or minus up to half of it.
    FixedJitter,
    /// Uniform in `[0, base_delay * 2^attempt]` (AWS full jitter).
    FullJitter,
}

/// Custom delay computation hook. Receives the retry index and the policy.
pub type DelayFn = Arc<dyn Fn(u32, &RetryPolicy) -> Duration + Send + Sync>;

/// Retry veto hook. Receives the error, the current state, and the retry
/// index. Returning `false` downgrades any planned retry or fallback to a
/// halt; returning `true` preserves the planned action. The hook can never
/// force a retry the planner did not offer.
pub type ShouldRetryFn = Arc<dyn Fn(&L0Error, &RunState, u32) -> bool + Send + Sync>;

/// Configuration for retry budgets and delays.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Budget for model-class retries per factory. `attempts = 1` means the
    /// initial attempt only, with no model-class retry.
    pub attempts: u32,

    /// Cap on all retries combined, network-class included.
    pub max_retries: u32,

    /// Base delay fed into the backoff strategies.
    pub base_delay: Duration,

    /// Ceiling applied to every computed delay.
    pub max_delay: Duration,

    /// Strategy for model-class retries.
    pub backoff: BackoffStrategy,

    /// Strategy for network-class retries.
    pub network_backoff: BackoffStrategy,

    /// When set, only these categories may be retried at all.
    pub retry_on: Option<Vec<ErrorCategory>>,

    /// Fixed delay overrides keyed by network error type.
    pub error_type_delays: HashMap<NetworkErrorType, Duration>,

    /// Custom delay computation. Overrides both strategies when set.
    pub calculate_delay: Option<DelayFn>,

    /// Retry veto hook, consulted last.
    pub should_retry: Option<ShouldRetryFn>,
}

impl RetryPolicy {
    /// Standard policy: 2 model attempts, 6 total retries, 1s base delay,
    /// 30s cap, fixed-jitter for model retries, exponential for network.
    pub fn standard() -> Self {
        Self {
            attempts: 2,
            max_retries: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::FixedJitter,
            network_backoff: BackoffStrategy::Exponential,
            retry_on: None,
            error_type_delays: HashMap::new(),
            calculate_delay: None,
            should_retry: None,
        }
    }

    /// No retry at all. Failures halt or fall back immediately.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// Set the model-class attempt budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the cap on all retries combined.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the model-class backoff strategy.
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Set the network-class backoff strategy.
    pub fn with_network_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.network_backoff = strategy;
        self
    }

    /// Restrict retries to the given categories.
    pub fn retry_only_on(mut self, categories: Vec<ErrorCategory>) -> Self {
        self.retry_on = Some(categories);
        self
    }

    /// Fixed delay for a specific network error type.
    pub fn with_error_type_delay(mut self, kind: NetworkErrorType, delay: Duration) -> Self {
        self.error_type_delays.insert(kind, delay);
        self
    }

    /// Install a custom delay computation.
    pub fn with_calculate_delay(
        mut self,
        f: impl Fn(u32, &RetryPolicy) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.calculate_delay = Some(Arc::new(f));
        self
    }

    /// Install a retry veto hook.
    pub fn with_should_retry(
        mut self,
        f: impl Fn(&L0Error, &RunState, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(f));
        self
    }

    /// Compute the delay before the given model-class retry (0-indexed).
    pub fn model_delay(&self, retry_index: u32) -> Duration {
        if let Some(ref f) = self.calculate_delay {
            return f(retry_index, self).min(self.max_delay);
        }
        compute_delay(self.backoff, retry_index, self.base_delay, self.max_delay)
    }

    /// Compute the delay before the given network-class retry (0-indexed).
    ///
    /// A per-type override wins over the strategy; a custom `calculate_delay`
    /// wins over both.
    pub fn network_delay(&self, retry_index: u32, kind: Option<NetworkErrorType>) -> Duration {
        if let Some(ref f) = self.calculate_delay {
            return f(retry_index, self).min(self.max_delay);
        }
        if let Some(kind) = kind {
            if let Some(delay) = self.error_type_delays.get(&kind) {
                return (*delay).min(self.max_delay);
            }
        }
        compute_delay(
            self.network_backoff,
            retry_index,
            self.base_delay,
            self.max_delay,
        )
    }

    /// Whether the category passes the `retry_on` filter.
    pub fn category_allowed(&self, category: ErrorCategory) -> bool {
        match self.retry_on {
            Some(ref allowed) => allowed.contains(&category),
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff", &self.backoff)
            .field("network_backoff", &self.network_backoff)
            .field("retry_on", &self.retry_on)
            .field("error_type_delays", &self.error_type_delays)
            .field("has_calculate_delay", &self.calculate_delay.is_some())
            .field("has_should_retry", &self.should_retry.is_some())
            .finish()
    }
}

/// Apply a backoff strategy and clamp to `max`.
pub fn compute_delay(
    strategy: BackoffStrategy,
    attempt: u32,
    base: Duration,
    max: Duration,
) -> Duration {
    let base_secs = base.as_secs_f64();
    let raw = match strategy {
        BackoffStrategy::Fixed => base_secs,
        BackoffStrategy::Linear => base_secs * (attempt as f64 + 1.0),
        BackoffStrategy::Exponential => base_secs * 2f64.powi(attempt as i32),
        BackoffStrategy::FixedJitter => {
            // base ± uniform(0, base/2)
            base_secs + (fastrand::f64() - 0.5) * base_secs
        }
        BackoffStrategy::FullJitter => fastrand::f64() * base_secs * 2f64.powi(attempt as i32),
    };
    Duration::from_secs_f64(raw.max(0.0).min(max.as_secs_f64()))
}
