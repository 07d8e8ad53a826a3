//! Lifecycle observation hooks.
//!
//! [`LifecycleObserver`] is a single trait with a default no-op method per
//! lifecycle signal; implement only what you care about. Observers run
//! inline on the runtime task, so long-running work belongs elsewhere.
//!
//! # Example
//!
//! ```
//! use l0::observer::LifecycleObserver;
//! use l0::event::StreamEvent;
//!
//! struct PrintTokens;
//!
//! impl LifecycleObserver for PrintTokens {
//!     fn on_event(&self, event: &StreamEvent) {
//!         if let StreamEvent::Token { value } = event {
//!             print!("{}", value);
//!         }
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::classify::RetryClass;
use crate::drift::DriftReport;
use crate::error::L0Error;
use crate::event::StreamEvent;
use crate::guardrail::Violation;
use crate::interceptor::AttemptCtx;
use crate::source::normalize::ToolCall;
use crate::state::RunState;

/// Details of a planned retry, passed to [`LifecycleObserver::on_retry`].
#[derive(Debug, Clone)]
pub struct RetryInfo {
    /// Retry index within its class, 0-indexed.
    pub retry_index: u32,
    /// Which budget the retry draws from.
    pub class: RetryClass,
    /// Delay before the retry begins.
    pub delay: Duration,
    /// Why the previous attempt failed.
    pub reason: String,
}

/// Details of a fallback switch, passed to [`LifecycleObserver::on_fallback`].
#[derive(Debug, Clone)]
pub struct FallbackInfo {
    /// Index before the switch (0 = primary).
    pub from_index: u32,
    /// Index after the switch.
    pub to_index: u32,
    /// Why the previous factory was abandoned.
    pub reason: String,
}

/// Which deadline expired, passed to [`LifecycleObserver::on_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    InitialToken,
    InterToken,
}

/// Lifecycle hooks invoked by the runtime. All methods default to no-ops.
///
/// Ordering guarantees: `on_event` is invoked before the corresponding
/// event is delivered to the caller; `on_start` opens every attempt;
/// `on_complete` or `on_error` is the last signal of a run, except for
/// `on_abort` which may follow a cancellation.
pub trait LifecycleObserver: Send + Sync {
    /// An attempt is starting.
    fn on_start(&self, _ctx: &AttemptCtx) {}

    /// A canonical event is about to be delivered to the caller.
    fn on_event(&self, _event: &StreamEvent) {}

    /// The run completed successfully.
    fn on_complete(&self, _state: &RunState) {}

    /// The run halted with an error.
    fn on_error(&self, _error: &L0Error) {}

    /// A guardrail produced a violation.
    fn on_violation(&self, _violation: &Violation) {}

    /// A retry of the current factory was planned.
    fn on_retry(&self, _info: &RetryInfo) {}

    /// The runtime switched to a fallback factory.
    fn on_fallback(&self, _info: &FallbackInfo) {}

    /// An attempt resumes from a checkpoint.
    fn on_resume(&self, _checkpoint: &str, _token_count: u32) {}

    /// A checkpoint was taken.
    fn on_checkpoint(&self, _checkpoint: &str, _token_count: u32) {}

    /// A stream deadline expired.
    fn on_timeout(&self, _kind: TimeoutKind) {}

    /// The run was aborted; reports tokens received and content length.
    fn on_abort(&self, _token_count: u32, _content_len: usize) {}

    /// Drift was detected in the emitted content.
    fn on_drift(&self, _report: &DriftReport) {}

    /// A tool call's arguments finished parsing.
    fn on_tool_call(&self, _call: &ToolCall) {}
}

/// Invoke a hook if an observer is present. No-op otherwise.
pub(crate) fn emit(
    observer: &Option<Arc<dyn LifecycleObserver>>,
    f: impl FnOnce(&dyn LifecycleObserver),
) {
    if let Some(ref obs) = observer {
        f(obs.as_ref());
    }
}

/// A [`LifecycleObserver`] backed by a closure over canonical events.
///
/// # Example
///
/// ```
/// use l0::observer::FnObserver;
/// use l0::event::StreamEvent;
/// use std::sync::Arc;
///
/// let observer = Arc::new(FnObserver(|event: &StreamEvent| {
///     if let StreamEvent::Token { value } = event {
///         print!("{}", value);
///     }
/// }));
/// ```
pub struct FnObserver<F: Fn(&StreamEvent) + Send + Sync>(pub F);

impl<F: Fn(&StreamEvent) + Send + Sync> LifecycleObserver for FnObserver<F> {
    fn on_event(&self, event: &StreamEvent) {
        (self.0)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_default_methods_are_no_ops() {
        struct Silent;
        impl LifecycleObserver for Silent {}

        let obs = Silent;
        obs.on_event(&StreamEvent::token("x"));
        obs.on_abort(0, 0);
        obs.on_timeout(TimeoutKind::InitialToken);
    }

    #[test]
    fn test_fn_observer_receives_events() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let obs = FnObserver(move |event: &StreamEvent| {
            if let StreamEvent::Token { value } = event {
                sink.lock().unwrap().push(value.clone());
            }
        });

        obs.on_event(&StreamEvent::token("a"));
        obs.on_event(&StreamEvent::Complete { usage: None });
        obs.on_event(&StreamEvent::token("b"));

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_emit_with_and_without_observer() {
        let none: Option<Arc<dyn LifecycleObserver>> = None;
        emit(&none, |o| o.on_abort(1, 2)); // no-op, must not panic

        let seen: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        struct Counter(Arc<Mutex<u32>>);
        impl LifecycleObserver for Counter {
            fn on_abort(&self, token_count: u32, _content_len: usize) {
                *self.0.lock().unwrap() += token_count;
            }
        }
        let some: Option<Arc<dyn LifecycleObserver>> = Some(Arc::new(Counter(seen.clone())));
        emit(&some, |o| o.on_abort(3, 10));
        assert_eq!(*seen.lock().unwrap(), 3);
    }
}
