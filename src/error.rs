//! Error surface: categories, closed code set, and captured context.
//!
//! Every failure the runtime surfaces is an [`L0Error`] carrying a code from
//! a closed set, a recovery category, and a context snapshot (checkpoint and
//! retry counters) captured at the moment of failure. Callers can recover
//! partial output from a halted run through [`L0Error::checkpoint`].

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use thiserror::Error;

/// Recovery category of an [`L0Error`]. Drives the retry planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport failure: dropped connection, reset, DNS, mid-stream timeout.
    /// Retries do not consume the model budget.
    Network,
    /// Provider backpressure (429/503). Retries do not consume the model budget.
    Transient,
    /// Malformed or degraded model output: drift, zero output, recoverable
    /// guardrail failures. Consumes the model budget.
    Model,
    /// Guardrail error-severity failure on content. Consumes the model budget.
    Content,
    /// Provider-signaled retryable failure (4xx/5xx subtype dependent).
    Provider,
    /// Unrecoverable: SSL, auth, context length, non-recoverable fatal
    /// guardrail. Never retried.
    Fatal,
    /// Violated invariant or broken configuration. Never retried.
    Internal,
}

impl ErrorCategory {
    /// Whether the planner may retry this category at all.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::Fatal | ErrorCategory::Internal)
    }

    /// Whether retries of this category consume the model budget.
    pub fn consumes_model_budget(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Model | ErrorCategory::Content | ErrorCategory::Provider
        )
    }

    /// Stable uppercase name, as it appears in serialized errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Transient => "TRANSIENT",
            ErrorCategory::Model => "MODEL",
            ErrorCategory::Content => "CONTENT",
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Fatal => "FATAL",
            ErrorCategory::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of error codes surfaced by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NetworkError,
    InitialTokenTimeout,
    InterTokenTimeout,
    GuardrailViolation,
    FatalGuardrailViolation,
    DriftDetected,
    ZeroOutput,
    StreamAborted,
    AllStreamsExhausted,
    InvalidStream,
    AdapterNotFound,
    FeatureNotEnabled,
    ProviderError,
    InternalError,
}

impl ErrorCode {
    /// Stable SCREAMING_SNAKE name, as it appears in serialized errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::InitialTokenTimeout => "INITIAL_TOKEN_TIMEOUT",
            ErrorCode::InterTokenTimeout => "INTER_TOKEN_TIMEOUT",
            ErrorCode::GuardrailViolation => "GUARDRAIL_VIOLATION",
            ErrorCode::FatalGuardrailViolation => "FATAL_GUARDRAIL_VIOLATION",
            ErrorCode::DriftDetected => "DRIFT_DETECTED",
            ErrorCode::ZeroOutput => "ZERO_OUTPUT",
            ErrorCode::StreamAborted => "STREAM_ABORTED",
            ErrorCode::AllStreamsExhausted => "ALL_STREAMS_EXHAUSTED",
            ErrorCode::InvalidStream => "INVALID_STREAM",
            ErrorCode::AdapterNotFound => "ADAPTER_NOT_FOUND",
            ErrorCode::FeatureNotEnabled => "FEATURE_NOT_ENABLED",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// The category this code belongs to when no finer classification applies.
    pub fn default_category(&self) -> ErrorCategory {
        match self {
            ErrorCode::NetworkError
            | ErrorCode::InitialTokenTimeout
            | ErrorCode::InterTokenTimeout => ErrorCategory::Network,
            ErrorCode::GuardrailViolation => ErrorCategory::Content,
            ErrorCode::DriftDetected | ErrorCode::ZeroOutput => ErrorCategory::Model,
            ErrorCode::ProviderError => ErrorCategory::Provider,
            ErrorCode::FatalGuardrailViolation
            | ErrorCode::StreamAborted
            | ErrorCode::AllStreamsExhausted => ErrorCategory::Fatal,
            ErrorCode::InvalidStream
            | ErrorCode::AdapterNotFound
            | ErrorCode::FeatureNotEnabled
            | ErrorCode::InternalError => ErrorCategory::Internal,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State captured at the moment of failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    /// Last known-good checkpoint, when one exists.
    pub checkpoint: Option<String>,
    /// Tokens received in the failing attempt.
    pub token_count: u32,
    /// Model-budget retries consumed so far.
    pub model_retry_count: u32,
    /// Network-class retries performed so far.
    pub network_retry_count: u32,
    /// Active fallback index (0 = primary).
    pub fallback_index: u32,
}

/// A failure surfaced by the runtime.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct L0Error {
    /// Code from the closed set.
    pub code: ErrorCode,
    /// Recovery category.
    pub category: ErrorCategory,
    /// Human-readable description.
    pub message: String,
    /// Wall-clock time of the failure.
    pub timestamp: SystemTime,
    /// State captured at failure.
    pub context: ErrorContext,
}

impl L0Error {
    /// Create an error with the code's default category.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            category: code.default_category(),
            message: message.into(),
            timestamp: SystemTime::now(),
            context: ErrorContext::default(),
        }
    }

    /// Create an error with an explicit category.
    pub fn with_category(
        code: ErrorCode,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            ..Self::new(code, message)
        }
    }

    /// A transport-level failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    /// Provider backpressure (429/503-class).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCode::ProviderError, ErrorCategory::Transient, message)
    }

    /// A provider HTTP failure. Status decides the category: 429/503 are
    /// transient, 401/403 are fatal, other 4xx/5xx consume the model budget.
    pub fn provider(status: u16, message: impl Into<String>) -> Self {
        let category = match status {
            429 | 503 => ErrorCategory::Transient,
            401 | 403 => ErrorCategory::Fatal,
            _ => ErrorCategory::Provider,
        };
        Self::with_category(ErrorCode::ProviderError, category, message)
    }

    /// An unrecoverable failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCode::ProviderError, ErrorCategory::Fatal, message)
    }

    /// A broken invariant or configuration.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The initial-token deadline expired.
    pub fn initial_token_timeout(limit_ms: u64) -> Self {
        Self::new(
            ErrorCode::InitialTokenTimeout,
            format!("no token within {}ms of stream acquisition", limit_ms),
        )
    }

    /// The inter-token deadline expired.
    pub fn inter_token_timeout(limit_ms: u64) -> Self {
        Self::new(
            ErrorCode::InterTokenTimeout,
            format!("no token within {}ms of the previous one", limit_ms),
        )
    }

    /// The run was cancelled through the abort handle or external signal.
    pub fn aborted(token_count: u32, content_len: usize) -> Self {
        Self::new(
            ErrorCode::StreamAborted,
            format!(
                "stream aborted after {} tokens ({} chars of content)",
                token_count, content_len
            ),
        )
    }

    /// A recoverable guardrail failure (error severity).
    pub fn guardrail(rule: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::GuardrailViolation,
            format!("guardrail '{}' failed: {}", rule, message.into()),
        )
    }

    /// A fatal, non-recoverable guardrail failure.
    pub fn fatal_guardrail(rule: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::FatalGuardrailViolation,
            format!("guardrail '{}' failed: {}", rule, message.into()),
        )
    }

    /// Semantic drift was detected and survives retry planning.
    pub fn drift(kinds: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DriftDetected,
            format!("drift detected: {}", kinds.into()),
        )
    }

    /// The provider completed without producing usable output.
    pub fn zero_output() -> Self {
        Self::new(
            ErrorCode::ZeroOutput,
            "stream completed with no usable output",
        )
    }

    /// Every configured factory has been exhausted. Carries the final cause.
    pub fn all_streams_exhausted(cause: &L0Error) -> Self {
        Self::new(
            ErrorCode::AllStreamsExhausted,
            format!("all stream factories exhausted; last error: {}", cause),
        )
    }

    /// The factory produced something that is not a recognizable stream.
    pub fn invalid_stream(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidStream, message)
    }

    /// No adapter is registered under the requested name.
    pub fn adapter_not_found(name: &str) -> Self {
        Self::new(
            ErrorCode::AdapterNotFound,
            format!("no adapter registered under '{}'", name),
        )
    }

    /// A feature-gated API was used without enabling the feature.
    pub fn feature_not_enabled(feature: &str) -> Self {
        Self::new(
            ErrorCode::FeatureNotEnabled,
            format!("'{}' is not enabled in the run options", feature),
        )
    }

    /// Attach a context snapshot.
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Whether a non-empty checkpoint was captured with this error.
    pub fn has_checkpoint(&self) -> bool {
        self.context
            .checkpoint
            .as_ref()
            .is_some_and(|c| !c.is_empty())
    }

    /// The captured checkpoint, if any.
    pub fn checkpoint(&self) -> Option<&str> {
        self.context.checkpoint.as_deref()
    }

    /// Milliseconds since the epoch at which the error was created.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Serialize to JSON (code, category, message, timestamp, context).
    pub fn to_json(&self) -> Value {
        json!({
            "code": self.code.as_str(),
            "category": self.category.as_str(),
            "message": self.message,
            "timestamp": self.timestamp_ms(),
            "context": {
                "checkpoint": self.context.checkpoint,
                "tokenCount": self.context.token_count,
                "modelRetryCount": self.context.model_retry_count,
                "networkRetryCount": self.context.network_retry_count,
                "fallbackIndex": self.context.fallback_index,
            },
        })
    }

    /// A multi-line rendering with the full context, for logs.
    pub fn to_detailed_string(&self) -> String {
        let mut out = format!(
            "[{}] {} ({})\n  tokens: {}, model retries: {}, network retries: {}, fallback: {}",
            self.code,
            self.message,
            self.category,
            self.context.token_count,
            self.context.model_retry_count,
            self.context.network_retry_count,
            self.context.fallback_index,
        );
        if let Some(ref cp) = self.context.checkpoint {
            out.push_str(&format!("\n  checkpoint: {} chars", cp.chars().count()));
        }
        out
    }
}

impl From<reqwest::Error> for L0Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            L0Error::network(format!("request timed out: {}", err))
        } else if let Some(status) = err.status() {
            L0Error::provider(status.as_u16(), err.to_string())
        } else {
            L0Error::network(err.to_string())
        }
    }
}

impl From<anyhow::Error> for L0Error {
    fn from(err: anyhow::Error) -> Self {
        L0Error::internal(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, L0Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_default_categories() {
        assert_eq!(
            ErrorCode::NetworkError.default_category(),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCode::InitialTokenTimeout.default_category(),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCode::ZeroOutput.default_category(),
            ErrorCategory::Model
        );
        assert_eq!(
            ErrorCode::FatalGuardrailViolation.default_category(),
            ErrorCategory::Fatal
        );
        assert_eq!(
            ErrorCode::InternalError.default_category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_category_retryability() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Model.is_retryable());
        assert!(!ErrorCategory::Fatal.is_retryable());
        assert!(!ErrorCategory::Internal.is_retryable());
    }

    #[test]
    fn test_budget_split() {
        assert!(!ErrorCategory::Network.consumes_model_budget());
        assert!(!ErrorCategory::Transient.consumes_model_budget());
        assert!(ErrorCategory::Model.consumes_model_budget());
        assert!(ErrorCategory::Content.consumes_model_budget());
        assert!(ErrorCategory::Provider.consumes_model_budget());
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(L0Error::provider(429, "x").category, ErrorCategory::Transient);
        assert_eq!(L0Error::provider(503, "x").category, ErrorCategory::Transient);
        assert_eq!(L0Error::provider(401, "x").category, ErrorCategory::Fatal);
        assert_eq!(L0Error::provider(500, "x").category, ErrorCategory::Provider);
        assert_eq!(L0Error::provider(400, "x").category, ErrorCategory::Provider);
    }

    #[test]
    fn test_checkpoint_helpers() {
        let err = L0Error::network("boom");
        assert!(!err.has_checkpoint());
        assert!(err.checkpoint().is_none());

        let err = err.with_context(ErrorContext {
            checkpoint: Some("partial output".into()),
            token_count: 3,
            ..Default::default()
        });
        assert!(err.has_checkpoint());
        assert_eq!(err.checkpoint(), Some("partial output"));
    }

    #[test]
    fn test_empty_checkpoint_does_not_count() {
        let err = L0Error::network("boom").with_context(ErrorContext {
            checkpoint: Some(String::new()),
            ..Default::default()
        });
        assert!(!err.has_checkpoint());
    }

    #[test]
    fn test_to_json_shape() {
        let err = L0Error::zero_output().with_context(ErrorContext {
            token_count: 0,
            model_retry_count: 2,
            ..Default::default()
        });
        let json = err.to_json();
        assert_eq!(json["code"], "ZERO_OUTPUT");
        assert_eq!(json["category"], "MODEL");
        assert_eq!(json["context"]["modelRetryCount"], 2);
        assert!(json["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_display_includes_code() {
        let err = L0Error::aborted(3, 42);
        let text = err.to_string();
        assert!(text.starts_with("STREAM_ABORTED:"));
        assert!(text.contains("3 tokens"));
    }

    #[test]
    fn test_detailed_string_mentions_checkpoint() {
        let err = L0Error::network("reset").with_context(ErrorContext {
            checkpoint: Some("abcdef".into()),
            ..Default::default()
        });
        assert!(err.to_detailed_string().contains("checkpoint: 6 chars"));
    }

    #[test]
    fn test_all_streams_exhausted_carries_cause() {
        let cause = L0Error::network("ECONNRESET");
        let err = L0Error::all_streams_exhausted(&cause);
        assert_eq!(err.code, ErrorCode::AllStreamsExhausted);
        assert!(err.message.contains("ECONNRESET"));
    }
}
