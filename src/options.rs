//! Run configuration.
//!
//! [`L0Options`] carries everything a run needs: the primary stream source,
//! ordered fallbacks, guardrails, retry policy, deadlines, check intervals,
//! continuation settings, observer, and interceptors. Construct through
//! [`L0Options::builder`].
//!
//! # Example
//!
//! ```
//! use l0::options::L0Options;
//! use l0::retry::RetryPolicy;
//! use l0::source::ScriptedSource;
//! use l0::watchdog::TimeoutConfig;
//!
//! let options = L0Options::builder(ScriptedSource::completing(&["Hello"]))
//!     .retry(RetryPolicy::standard())
//!     .timeout(TimeoutConfig::default().initial_token_ms(5_000))
//!     .build();
//! ```

use std::sync::Arc;

use crate::abort::AbortHandle;
use crate::continuation::DedupOptions;
use crate::drift::DriftDetector;
use crate::guardrail::Guardrail;
use crate::interceptor::Interceptor;
use crate::observer::LifecycleObserver;
use crate::retry::RetryPolicy;
use crate::source::StreamSource;
use crate::watchdog::TimeoutConfig;

/// Token intervals for periodic checks. Zero disables a check.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckIntervals {
    /// Run streaming guardrails every N tokens.
    pub guardrails: u32,
    /// Run drift analysis every N tokens.
    pub drift: u32,
    /// Take a checkpoint every N tokens.
    pub checkpoint: u32,
}

impl CheckIntervals {
    pub fn guardrails_every(mut self, tokens: u32) -> Self {
        self.guardrails = tokens;
        self
    }

    pub fn drift_every(mut self, tokens: u32) -> Self {
        self.drift = tokens;
        self
    }

    pub fn checkpoint_every(mut self, tokens: u32) -> Self {
        self.checkpoint = tokens;
        self
    }
}

/// User override mapping the last checkpoint to the next prompt.
pub type PromptBuilderFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Configuration for one run.
pub struct L0Options {
    pub(crate) source: Arc<dyn StreamSource>,
    pub(crate) fallbacks: Vec<Arc<dyn StreamSource>>,
    pub(crate) guardrails: Vec<Guardrail>,
    pub(crate) retry: RetryPolicy,
    pub(crate) timeout: TimeoutConfig,
    pub(crate) intervals: CheckIntervals,
    pub(crate) detect_drift: bool,
    pub(crate) drift_detector: DriftDetector,
    pub(crate) detect_zero_tokens: bool,
    pub(crate) continue_from_checkpoint: bool,
    pub(crate) build_continuation_prompt: Option<PromptBuilderFn>,
    pub(crate) deduplicate_continuation: bool,
    pub(crate) dedup: DedupOptions,
    pub(crate) observer: Option<Arc<dyn LifecycleObserver>>,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) abort: AbortHandle,
    pub(crate) telemetry: bool,
}

impl L0Options {
    /// Start building options around the primary stream source.
    pub fn builder(source: impl StreamSource + 'static) -> L0OptionsBuilder {
        Self::builder_arc(Arc::new(source))
    }

    /// Start building options around an already-shared source.
    pub fn builder_arc(source: Arc<dyn StreamSource>) -> L0OptionsBuilder {
        L0OptionsBuilder {
            source,
            fallbacks: Vec::new(),
            guardrails: Vec::new(),
            retry: RetryPolicy::standard(),
            timeout: TimeoutConfig::default(),
            intervals: CheckIntervals::default(),
            detect_drift: false,
            drift_detector: DriftDetector::new(),
            detect_zero_tokens: false,
            continue_from_checkpoint: false,
            build_continuation_prompt: None,
            deduplicate_continuation: true,
            dedup: DedupOptions::default(),
            observer: None,
            interceptors: Vec::new(),
            abort: None,
            telemetry: true,
        }
    }
}

impl std::fmt::Debug for L0Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L0Options")
            .field("source", &self.source.name())
            .field("fallbacks", &self.fallbacks.len())
            .field("guardrails", &self.guardrails.len())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("intervals", &self.intervals)
            .field("detect_drift", &self.detect_drift)
            .field("detect_zero_tokens", &self.detect_zero_tokens)
            .field("continue_from_checkpoint", &self.continue_from_checkpoint)
            .field(
                "has_prompt_builder",
                &self.build_continuation_prompt.is_some(),
            )
            .field("deduplicate_continuation", &self.deduplicate_continuation)
            .field("interceptors", &self.interceptors.len())
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

/// Builder for [`L0Options`].
pub struct L0OptionsBuilder {
    source: Arc<dyn StreamSource>,
    fallbacks: Vec<Arc<dyn StreamSource>>,
    guardrails: Vec<Guardrail>,
    retry: RetryPolicy,
    timeout: TimeoutConfig,
    intervals: CheckIntervals,
    detect_drift: bool,
    drift_detector: DriftDetector,
    detect_zero_tokens: bool,
    continue_from_checkpoint: bool,
    build_continuation_prompt: Option<PromptBuilderFn>,
    deduplicate_continuation: bool,
    dedup: DedupOptions,
    observer: Option<Arc<dyn LifecycleObserver>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    abort: Option<AbortHandle>,
    telemetry: bool,
}

impl L0OptionsBuilder {
    /// Append a fallback source, tried after the primary exhausts retries.
    pub fn fallback(mut self, source: impl StreamSource + 'static) -> Self {
        self.fallbacks.push(Arc::new(source));
        self
    }

    /// Append an already-shared fallback source.
    pub fn fallback_arc(mut self, source: Arc<dyn StreamSource>) -> Self {
        self.fallbacks.push(source);
        self
    }

    /// Append a guardrail. Rules run in registration order.
    pub fn guardrail(mut self, rule: Guardrail) -> Self {
        self.guardrails.push(rule);
        self
    }

    /// Set the retry policy. Default: [`RetryPolicy::standard`].
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set stream deadlines. Default: disabled.
    pub fn timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set periodic check intervals. Default: all disabled.
    pub fn check_intervals(mut self, intervals: CheckIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Enable drift detection (requires a non-zero drift interval).
    pub fn detect_drift(mut self, enabled: bool) -> Self {
        self.detect_drift = enabled;
        self
    }

    /// Replace the drift detector configuration.
    pub fn drift_detector(mut self, detector: DriftDetector) -> Self {
        self.drift_detector = detector;
        self
    }

    /// Treat zero-token or whitespace-only completions as recoverable
    /// failures.
    pub fn detect_zero_tokens(mut self, enabled: bool) -> Self {
        self.detect_zero_tokens = enabled;
        self
    }

    /// Enable checkpoint-based resumption.
    pub fn continue_from_last_known_good_token(mut self, enabled: bool) -> Self {
        self.continue_from_checkpoint = enabled;
        self
    }

    /// Override how the continuation prompt is built from the checkpoint.
    pub fn build_continuation_prompt(
        mut self,
        f: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.build_continuation_prompt = Some(Arc::new(f));
        self
    }

    /// Strip the regenerated checkpoint prefix on resume. Default: true.
    pub fn deduplicate_continuation(mut self, enabled: bool) -> Self {
        self.deduplicate_continuation = enabled;
        self
    }

    /// Tune the dedup overlap search.
    pub fn dedup_options(mut self, dedup: DedupOptions) -> Self {
        self.dedup = dedup;
        self
    }

    /// Install a lifecycle observer.
    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Append an interceptor.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Use an external abort handle as the cancellation signal.
    pub fn signal(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Enable or disable telemetry aggregation. Default: enabled.
    pub fn telemetry(mut self, enabled: bool) -> Self {
        self.telemetry = enabled;
        self
    }

    pub fn build(self) -> L0Options {
        L0Options {
            source: self.source,
            fallbacks: self.fallbacks,
            guardrails: self.guardrails,
            retry: self.retry,
            timeout: self.timeout,
            intervals: self.intervals,
            detect_drift: self.detect_drift,
            drift_detector: self.drift_detector,
            detect_zero_tokens: self.detect_zero_tokens,
            continue_from_checkpoint: self.continue_from_checkpoint,
            build_continuation_prompt: self.build_continuation_prompt,
            deduplicate_continuation: self.deduplicate_continuation,
            dedup: self.dedup,
            observer: self.observer,
            interceptors: self.interceptors,
            abort: self.abort.unwrap_or_default(),
            telemetry: self.telemetry,
        }
    }
}
