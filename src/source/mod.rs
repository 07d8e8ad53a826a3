//! Stream sources: factories the runtime acquires provider streams from.
//!
//! A [`StreamSource`] produces one canonical event stream per attempt. The
//! runtime passes a [`StreamRequest`] describing the attempt (retry,
//! fallback, continuation) so sources can adjust the outgoing provider
//! request; the bundled HTTP sources substitute the continuation prompt,
//! test sources usually ignore it.
//!
//! ```text
//! runtime ──► StreamRequest ──► StreamSource::open() ──► EventStream
//!                                       │
//!                     ┌─────────────────┼─────────────────┐
//!                OpenAiSource      OllamaSource      ScriptedSource
//!                SSE frames        NDJSON frames     canned steps
//! ```

pub mod ndjson;
pub mod normalize;
pub mod ollama;
pub mod openai;
pub mod scripted;
pub mod sse;

pub use ndjson::NdjsonDecoder;
pub use ollama::OllamaSource;
pub use openai::OpenAiSource;
pub use scripted::{ScriptStep, ScriptedSource};
pub use sse::SseDecoder;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::event::StreamEvent;

/// A pinned, boxed canonical event stream owned by a single attempt.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Resume context handed to a source when an attempt continues from a
/// checkpoint.
#[derive(Debug, Clone)]
pub struct ContinuationHint {
    /// The checkpoint being resumed from.
    pub checkpoint: String,
    /// Tokens accumulated when the checkpoint was taken.
    pub token_count: u32,
    /// The continuation prompt to send instead of the original one.
    pub prompt: String,
}

/// Attempt context passed to [`StreamSource::open`].
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// Overall attempt number, 1-indexed.
    pub attempt: u32,
    /// Whether this attempt is a retry of the same factory.
    pub is_retry: bool,
    /// Whether this attempt runs on a fallback factory.
    pub is_fallback: bool,
    /// Active fallback index (0 = primary).
    pub fallback_index: u32,
    /// Present when this attempt resumes from a checkpoint.
    pub continuation: Option<ContinuationHint>,
}

impl StreamRequest {
    /// The continuation prompt, when this attempt is a resume.
    pub fn continuation_prompt(&self) -> Option<&str> {
        self.continuation.as_ref().map(|c| c.prompt.as_str())
    }
}

/// Abstraction over provider stream factories.
///
/// One `open` call corresponds to one attempt. The returned stream is owned
/// by that attempt; on abort or timeout it is dropped, never reused.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn StreamSource>`.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Acquire a fresh canonical event stream for one attempt.
    async fn open(&self, request: &StreamRequest) -> Result<EventStream>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str {
        "source"
    }
}

/// A [`StreamSource`] backed by a closure, for callers that do not want to
/// implement the trait.
pub struct FnSource<F>
where
    F: Fn(&StreamRequest) -> Result<EventStream> + Send + Sync,
{
    f: F,
}

impl<F> FnSource<F>
where
    F: Fn(&StreamRequest) -> Result<EventStream> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> StreamSource for FnSource<F>
where
    F: Fn(&StreamRequest) -> Result<EventStream> + Send + Sync,
{
    async fn open(&self, request: &StreamRequest) -> Result<EventStream> {
        (self.f)(request)
    }

    fn name(&self) -> &'static str {
        "fn"
    }
}
