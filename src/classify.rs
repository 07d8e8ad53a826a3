//! Error classification and the retry/fallback/halt planner.
//!
//! Classification splits failures into the seven recovery categories; the
//! planner turns a classified failure plus the current budgets into an
//! [`Action`]. Network-class failures never touch the model budget, model
//! and content failures consume it, and fatal/internal failures halt
//! unconditionally.

use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::debug;

use crate::error::{ErrorCategory, ErrorCode, L0Error};
use crate::retry::RetryPolicy;
use crate::state::RunState;

/// Fine-grained transport failure type, used for per-type delay overrides
/// and telemetry grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorType {
    ConnectionDropped,
    ConnectionRefused,
    ConnectionReset,
    DnsFailure,
    SseAborted,
    RuntimeKilled,
    BackgroundThrottle,
    PartialChunks,
    NoBytes,
    Timeout,
    Unknown,
}

impl NetworkErrorType {
    /// Stable snake_case name, used as a telemetry grouping key.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkErrorType::ConnectionDropped => "connection_dropped",
            NetworkErrorType::ConnectionRefused => "connection_refused",
            NetworkErrorType::ConnectionReset => "connection_reset",
            NetworkErrorType::DnsFailure => "dns_failure",
            NetworkErrorType::SseAborted => "sse_aborted",
            NetworkErrorType::RuntimeKilled => "runtime_killed",
            NetworkErrorType::BackgroundThrottle => "background_throttle",
            NetworkErrorType::PartialChunks => "partial_chunks",
            NetworkErrorType::NoBytes => "no_bytes",
            NetworkErrorType::Timeout => "timeout",
            NetworkErrorType::Unknown => "unknown",
        }
    }
}

/// A categorized network error, recorded into the running state.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkErrorRecord {
    /// Classified transport failure type.
    pub error_type: NetworkErrorType,
    /// Original error message.
    pub message: String,
    /// When the failure was observed.
    #[serde(skip)]
    pub at: SystemTime,
}

impl NetworkErrorRecord {
    pub fn new(error_type: NetworkErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            at: SystemTime::now(),
        }
    }
}

/// Classify a transport error message into a [`NetworkErrorType`].
///
/// Matching is substring-based over the lowercased message, the same way
/// provider SDKs surface these conditions in error text.
pub fn classify_network_message(message: &str) -> NetworkErrorType {
    let msg = message.to_lowercase();

    if msg.contains("econnreset") || msg.contains("connection reset") {
        NetworkErrorType::ConnectionReset
    } else if msg.contains("econnrefused") || msg.contains("connection refused") {
        NetworkErrorType::ConnectionRefused
    } else if msg.contains("enotfound")
        || msg.contains("dns")
        || msg.contains("name resolution")
        || msg.contains("name or service not known")
    {
        NetworkErrorType::DnsFailure
    } else if msg.contains("sse") && (msg.contains("abort") || msg.contains("closed")) {
        NetworkErrorType::SseAborted
    } else if msg.contains("timed out") || msg.contains("timeout") {
        NetworkErrorType::Timeout
    } else if msg.contains("runtime") && (msg.contains("killed") || msg.contains("terminated")) {
        NetworkErrorType::RuntimeKilled
    } else if msg.contains("throttl") || msg.contains("backgrounded") {
        NetworkErrorType::BackgroundThrottle
    } else if msg.contains("partial chunk") || msg.contains("incomplete chunk") {
        NetworkErrorType::PartialChunks
    } else if msg.contains("no bytes") || msg.contains("empty body") || msg.contains("empty response")
    {
        NetworkErrorType::NoBytes
    } else if msg.contains("connection closed")
        || msg.contains("connection dropped")
        || msg.contains("broken pipe")
        || msg.contains("fetch failed")
        || msg.contains("socket hang up")
    {
        NetworkErrorType::ConnectionDropped
    } else {
        NetworkErrorType::Unknown
    }
}

/// The network error type of an error, when it is network-class.
pub fn network_type_of(err: &L0Error) -> Option<NetworkErrorType> {
    if err.category != ErrorCategory::Network {
        return None;
    }
    Some(match err.code {
        ErrorCode::InitialTokenTimeout | ErrorCode::InterTokenTimeout => NetworkErrorType::Timeout,
        _ => classify_network_message(&err.message),
    })
}

/// Which budget a planned retry draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Does not consume the model budget.
    Network,
    /// Consumes the model budget.
    Model,
}

/// Planner output for a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Retry the current factory after the delay.
    Retry { class: RetryClass, delay: Duration },
    /// Advance to the next fallback factory after the delay.
    Fallback { delay: Duration },
    /// Stop and surface the error. `exhausted` marks a model-budget halt
    /// with no fallback left, which surfaces as `ALL_STREAMS_EXHAUSTED`.
    Halt { exhausted: bool },
}

/// Decide what to do about a failed attempt.
///
/// Expects `state.model_retry_count` to already include the failing attempt
/// when the category consumes the model budget (`attempts` counts
/// budget-consuming attempts per factory, so `attempts = 1` disables
/// model-class retry). `fallback_total` is the number of configured fallback
/// factories. The user `should_retry` hook is consulted last and can only
/// downgrade a planned retry or fallback to a halt.
pub fn plan(
    err: &L0Error,
    state: &RunState,
    policy: &RetryPolicy,
    fallback_total: usize,
) -> Action {
    let category = err.category;
    let planned = plan_by_budget(err, state, policy, fallback_total);

    let action = match planned {
        Action::Halt { .. } => planned,
        other => {
            if let Some(ref hook) = policy.should_retry {
                let retry_index = state.network_retry_count + state.model_retry_count;
                if !hook(err, state, retry_index) {
                    debug!(code = %err.code, "should_retry hook vetoed recovery");
                    Action::Halt { exhausted: false }
                } else {
                    other
                }
            } else {
                other
            }
        }
    };

    debug!(
        code = %err.code,
        category = %category,
        model_retries = state.model_retry_count,
        network_retries = state.network_retry_count,
        fallback_index = state.fallback_index,
        ?action,
        "planned recovery action"
    );
    action
}

fn plan_by_budget(
    err: &L0Error,
    state: &RunState,
    policy: &RetryPolicy,
    fallback_total: usize,
) -> Action {
    let category = err.category;

    if !category.is_retryable() {
        return Action::Halt { exhausted: false };
    }
    if !policy.category_allowed(category) {
        return Action::Halt { exhausted: false };
    }

    let total_retries = state.network_retry_count + state.model_retry_count;

    match category {
        ErrorCategory::Network | ErrorCategory::Transient => {
            if total_retries + 1 <= policy.max_retries {
                let delay = policy.network_delay(state.network_retry_count, network_type_of(err));
                Action::Retry {
                    class: RetryClass::Network,
                    delay,
                }
            } else {
                Action::Halt { exhausted: false }
            }
        }
        ErrorCategory::Model | ErrorCategory::Content | ErrorCategory::Provider => {
            if state.model_retry_count < policy.attempts && total_retries <= policy.max_retries {
                Action::Retry {
                    class: RetryClass::Model,
                    delay: policy.model_delay(state.model_retry_count.saturating_sub(1)),
                }
            } else if (state.fallback_index as usize) < fallback_total {
                Action::Fallback {
                    delay: policy.model_delay(0),
                }
            } else {
                Action::Halt { exhausted: true }
            }
        }
        ErrorCategory::Fatal | ErrorCategory::Internal => Action::Halt { exhausted: false },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffStrategy;

    fn policy() -> RetryPolicy {
        RetryPolicy::standard()
            .with_backoff(BackoffStrategy::Fixed)
            .with_network_backoff(BackoffStrategy::Fixed)
            .with_base_delay(Duration::from_millis(10))
    }

    #[test]
    fn test_classify_connection_reset() {
        assert_eq!(
            classify_network_message("read ECONNRESET"),
            NetworkErrorType::ConnectionReset
        );
        assert_eq!(
            classify_network_message("Connection reset by peer"),
            NetworkErrorType::ConnectionReset
        );
    }

    #[test]
    fn test_classify_refused_and_dns() {
        assert_eq!(
            classify_network_message("connect ECONNREFUSED 127.0.0.1:443"),
            NetworkErrorType::ConnectionRefused
        );
        assert_eq!(
            classify_network_message("getaddrinfo ENOTFOUND api.example.com"),
            NetworkErrorType::DnsFailure
        );
    }

    #[test]
    fn test_classify_timeout_and_sse() {
        assert_eq!(
            classify_network_message("request timed out after 30s"),
            NetworkErrorType::Timeout
        );
        assert_eq!(
            classify_network_message("SSE connection aborted"),
            NetworkErrorType::SseAborted
        );
    }

    #[test]
    fn test_classify_dropped_and_unknown() {
        assert_eq!(
            classify_network_message("broken pipe"),
            NetworkErrorType::ConnectionDropped
        );
        assert_eq!(
            classify_network_message("something novel happened"),
            NetworkErrorType::Unknown
        );
    }

    #[test]
    fn test_network_type_of_timeouts() {
        assert_eq!(
            network_type_of(&L0Error::initial_token_timeout(50)),
            Some(NetworkErrorType::Timeout)
        );
        assert_eq!(
            network_type_of(&L0Error::inter_token_timeout(100)),
            Some(NetworkErrorType::Timeout)
        );
        assert_eq!(network_type_of(&L0Error::zero_output()), None);
    }

    #[test]
    fn test_fatal_halts() {
        let state = RunState::new();
        let err = L0Error::fatal("ssl handshake failed");
        assert_eq!(plan(&err, &state, &policy(), 3), Action::Halt { exhausted: false });
    }

    #[test]
    fn test_internal_halts() {
        let state = RunState::new();
        let err = L0Error::internal("missing adapter");
        assert_eq!(plan(&err, &state, &policy(), 3), Action::Halt { exhausted: false });
    }

    #[test]
    fn test_network_retry_within_budget() {
        let state = RunState::new();
        let err = L0Error::network("ECONNRESET");
        match plan(&err, &state, &policy(), 0) {
            Action::Retry { class, .. } => assert_eq!(class, RetryClass::Network),
            other => panic!("expected network retry, got {:?}", other),
        }
    }

    #[test]
    fn test_network_halt_when_max_retries_spent() {
        let mut state = RunState::new();
        state.network_retry_count = 4;
        state.model_retry_count = 2;
        let err = L0Error::network("ECONNRESET");
        // total 6, +1 > max_retries 6; network exhaustion surfaces the
        // original error, not ALL_STREAMS_EXHAUSTED.
        assert_eq!(plan(&err, &state, &policy(), 0), Action::Halt { exhausted: false });
    }

    #[test]
    fn test_model_retry_then_fallback_then_exhausted_halt() {
        // The failing attempt is counted before planning: with attempts = 2,
        // the first failure (count 1) retries, the second (count 2) falls
        // back, and with no factories left the halt is an exhaustion.
        let p = policy().with_attempts(2);
        let err = L0Error::zero_output();

        let mut state = RunState::new();
        state.model_retry_count = 1;
        assert!(matches!(
            plan(&err, &state, &p, 1),
            Action::Retry {
                class: RetryClass::Model,
                ..
            }
        ));

        state.model_retry_count = 2;
        assert!(matches!(plan(&err, &state, &p, 1), Action::Fallback { .. }));

        state.fallback_index = 1;
        assert_eq!(plan(&err, &state, &p, 1), Action::Halt { exhausted: true });
    }

    #[test]
    fn test_attempts_of_one_disables_model_retry() {
        let p = policy().with_attempts(1);
        let err = L0Error::zero_output();

        let mut state = RunState::new();
        state.model_retry_count = 1; // the single attempt, already counted
        assert_eq!(plan(&err, &state, &p, 0), Action::Halt { exhausted: true });
        assert!(matches!(plan(&err, &state, &p, 1), Action::Fallback { .. }));
    }

    #[test]
    fn test_model_retry_respects_max_retries() {
        let p = policy().with_attempts(5).with_max_retries(2);
        let err = L0Error::zero_output();
        let mut state = RunState::new();
        state.network_retry_count = 2;
        state.model_retry_count = 1;
        // Model budget remains but the global cap is spent.
        assert_eq!(plan(&err, &state, &p, 0), Action::Halt { exhausted: true });
    }

    #[test]
    fn test_retry_on_gate_halts_unlisted_category() {
        let p = policy().retry_only_on(vec![ErrorCategory::Network]);
        let state = RunState::new();
        assert_eq!(
            plan(&L0Error::zero_output(), &state, &p, 1),
            Action::Halt { exhausted: false }
        );
        assert!(matches!(
            plan(&L0Error::network("reset"), &state, &p, 1),
            Action::Retry { .. }
        ));
    }

    #[test]
    fn test_should_retry_vetoes_retry_and_fallback() {
        let p = policy().with_should_retry(|_, _, _| false);
        let state = RunState::new();
        assert_eq!(
            plan(&L0Error::network("reset"), &state, &p, 0),
            Action::Halt { exhausted: false }
        );

        let mut spent = RunState::new();
        spent.model_retry_count = 2;
        assert_eq!(
            plan(&L0Error::zero_output(), &spent, &p, 3),
            Action::Halt { exhausted: false }
        );
    }

    #[test]
    fn test_should_retry_true_preserves_action() {
        let p = policy().with_should_retry(|_, _, _| true);
        let state = RunState::new();
        assert!(matches!(
            plan(&L0Error::network("reset"), &state, &p, 0),
            Action::Retry { .. }
        ));
    }

    #[test]
    fn test_network_delay_uses_type_override() {
        let p = policy()
            .with_error_type_delay(NetworkErrorType::ConnectionReset, Duration::from_millis(7));
        let state = RunState::new();
        let err = L0Error::network("ECONNRESET");
        match plan(&err, &state, &p, 0) {
            Action::Retry { delay, .. } => assert_eq!(delay, Duration::from_millis(7)),
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_transient_uses_network_budget() {
        let mut state = RunState::new();
        state.model_retry_count = 2; // model budget spent
        let err = L0Error::transient("429 too many requests");
        // Still retries: transient draws from the shared cap, not `attempts`.
        assert!(matches!(
            plan(&err, &state, &policy(), 0),
            Action::Retry {
                class: RetryClass::Network,
                ..
            }
        ));
    }
}
