//! Canonical event model for normalized provider streams.
//!
//! Every provider frame is normalized into a [`StreamEvent`] before the
//! orchestrator sees it. One provider frame may yield zero, one, or several
//! canonical events; ordering is preserved.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A normalized event flowing out of a stream source and through the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An additive text delta. The only event that grows the accumulated
    /// content.
    Token {
        /// The delta text.
        value: String,
    },
    /// A structured message (tool call, non-text assistant output),
    /// serialized as a string.
    Message {
        /// Role of the message author.
        role: Role,
        /// Serialized message payload (JSON for tool calls).
        value: String,
    },
    /// A multimodal payload.
    Data(DataPayload),
    /// Advisory progress information.
    Progress {
        /// Completion percentage, 0-100.
        percent: Option<f64>,
        /// Current step number.
        step: Option<u32>,
        /// Total number of steps.
        total_steps: Option<u32>,
        /// Human-readable progress message.
        message: Option<String>,
        /// Estimated milliseconds remaining.
        eta_ms: Option<u64>,
    },
    /// A stream-level error. Does not by itself terminate the run; the
    /// orchestrator decides what happens next.
    StreamError {
        /// Error description from the provider or transport.
        error: String,
        /// Optional machine-readable reason.
        reason: Option<String>,
    },
    /// Terminal success marker from the provider.
    Complete {
        /// Token usage reported by the provider, if any.
        usage: Option<Usage>,
    },
}

impl StreamEvent {
    /// Shorthand for a token event.
    pub fn token(value: impl Into<String>) -> Self {
        StreamEvent::Token {
            value: value.into(),
        }
    }

    /// Shorthand for an assistant message event.
    pub fn message(role: Role, value: impl Into<String>) -> Self {
        StreamEvent::Message {
            role,
            value: value.into(),
        }
    }

    /// Whether this event carries content that satisfies the first-token
    /// deadline and rearms the inter-token deadline.
    pub fn is_value_bearing(&self) -> bool {
        matches!(
            self,
            StreamEvent::Token { .. } | StreamEvent::Message { .. } | StreamEvent::Data(_)
        )
    }

    /// Whether this event terminates the provider stream on success.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. })
    }
}

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) output.
    Assistant,
    /// Tool invocation or result.
    Tool,
}

/// Content type of a [`DataPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Audio,
    Video,
    File,
    Json,
    Binary,
}

/// A multimodal payload carried by a [`StreamEvent::Data`] event.
///
/// Exactly one of `base64`, `url`, `bytes`, or `json` is expected to be
/// populated; the runtime passes the payload through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DataPayload {
    /// What kind of content this payload carries.
    pub content_type: Option<ContentType>,
    /// MIME type, when known (e.g. `image/png`).
    pub mime: Option<String>,
    /// Base64-encoded content.
    pub base64: Option<String>,
    /// URL pointing at the content.
    pub url: Option<String>,
    /// Raw bytes.
    pub bytes: Option<Vec<u8>>,
    /// Structured JSON content.
    pub json: Option<Value>,
    /// Provider-specific metadata.
    pub metadata: Option<Value>,
}

/// Token usage reported by a provider on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: Option<u64>,
    /// Tokens produced by the completion.
    pub completion_tokens: Option<u64>,
    /// Total tokens, when the provider reports it directly.
    pub total_tokens: Option<u64>,
}
