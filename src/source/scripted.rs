//! Scripted source for testing without a live provider.
//!
//! [`ScriptedSource`] plays back pre-configured step lists, one per attempt,
//! cycling when exhausted. Steps can emit events, wait, fail mid-stream, or
//! complete, which makes retry, timeout, and abort behavior fully
//! deterministic in tests.
//!
//! # Example
//!
//! ```
//! use l0::source::{ScriptStep, ScriptedSource};
//!
//! let source = ScriptedSource::completing(&["Hello ", "world"]);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{EventStream, StreamRequest, StreamSource};
use crate::error::{L0Error, Result};
use crate::event::{DataPayload, Role, StreamEvent, Usage};

/// One step of a scripted attempt.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit a token delta.
    Token(String),
    /// Emit a structured message.
    Message { role: Role, value: String },
    /// Emit a multimodal payload.
    Data(DataPayload),
    /// Emit an advisory progress event.
    Progress(f64),
    /// Emit a stream-level error event (the stream itself continues).
    FrameError { error: String, reason: Option<String> },
    /// Sleep before the next step.
    Wait(Duration),
    /// Fail the stream with the given error.
    Fail(L0Error),
    /// Complete without usage.
    Complete,
    /// Complete with usage.
    CompleteWith(Usage),
}

impl ScriptStep {
    pub fn token(value: impl Into<String>) -> Self {
        ScriptStep::Token(value.into())
    }

    pub fn wait_ms(ms: u64) -> Self {
        ScriptStep::Wait(Duration::from_millis(ms))
    }

    pub fn fail_network(message: impl Into<String>) -> Self {
        ScriptStep::Fail(L0Error::network(message))
    }
}

/// A test source that plays back canned scripts in order.
///
/// Cycles back to the first script when all have been consumed. Records
/// every [`StreamRequest`] it receives for assertions.
pub struct ScriptedSource {
    scripts: Vec<Vec<ScriptStep>>,
    index: AtomicUsize,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedSource {
    /// Create a source with one script per attempt.
    pub fn new(scripts: Vec<Vec<ScriptStep>>) -> Self {
        assert!(
            !scripts.is_empty(),
            "ScriptedSource requires at least one script"
        );
        Self {
            scripts,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A source that replays the same script on every attempt.
    pub fn single(script: Vec<ScriptStep>) -> Self {
        Self::new(vec![script])
    }

    /// A source that streams the given tokens and completes.
    pub fn completing(tokens: &[&str]) -> Self {
        let mut script: Vec<ScriptStep> =
            tokens.iter().map(|t| ScriptStep::token(*t)).collect();
        script.push(ScriptStep::Complete);
        Self::single(script)
    }

    /// A source that always fails with the given error before any token.
    pub fn always_failing(err: L0Error) -> Self {
        Self::single(vec![ScriptStep::Fail(err)])
    }

    /// How many times the source has been opened.
    pub fn opens(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// The requests received so far, in order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }

    fn next_script(&self) -> Vec<ScriptStep> {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.scripts.len();
        self.scripts[idx].clone()
    }
}

#[async_trait]
impl StreamSource for ScriptedSource {
    async fn open(&self, request: &StreamRequest) -> Result<EventStream> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(request.clone());
        let steps: VecDeque<ScriptStep> = self.next_script().into();

        let stream = futures::stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    ScriptStep::Wait(delay) => {
                        tokio::time::sleep(delay).await;
                    }
                    ScriptStep::Token(value) => {
                        return Some((Ok(StreamEvent::Token { value }), steps))
                    }
                    ScriptStep::Message { role, value } => {
                        return Some((Ok(StreamEvent::Message { role, value }), steps))
                    }
                    ScriptStep::Data(payload) => {
                        return Some((Ok(StreamEvent::Data(payload)), steps))
                    }
                    ScriptStep::Progress(percent) => {
                        return Some((
                            Ok(StreamEvent::Progress {
                                percent: Some(percent),
                                step: None,
                                total_steps: None,
                                message: None,
                                eta_ms: None,
                            }),
                            steps,
                        ))
                    }
                    ScriptStep::FrameError { error, reason } => {
                        return Some((Ok(StreamEvent::StreamError { error, reason }), steps))
                    }
                    ScriptStep::Fail(err) => return Some((Err(err), steps)),
                    ScriptStep::Complete => {
                        return Some((Ok(StreamEvent::Complete { usage: None }), steps))
                    }
                    ScriptStep::CompleteWith(usage) => {
                        return Some((
                            Ok(StreamEvent::Complete {
                                usage: Some(usage),
                            }),
                            steps,
                        ))
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn drain(mut stream: EventStream) -> Vec<Result<StreamEvent>> {
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_completing_source_plays_tokens_then_complete() {
        let source = ScriptedSource::completing(&["Hello ", "world"]);
        let stream = source.open(&StreamRequest::default()).await.unwrap();
        let events = drain(stream).await;

        assert_eq!(events.len(), 3);
        assert_eq!(
            *events[0].as_ref().unwrap(),
            StreamEvent::token("Hello ")
        );
        assert_eq!(*events[1].as_ref().unwrap(), StreamEvent::token("world"));
        assert!(matches!(
            events[2].as_ref().unwrap(),
            StreamEvent::Complete { .. }
        ));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_surfaces_as_err() {
        let source = ScriptedSource::single(vec![
            ScriptStep::token("Hi"),
            ScriptStep::fail_network("read ECONNRESET"),
        ]);
        let stream = source.open(&StreamRequest::default()).await.unwrap();
        let events = drain(stream).await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].as_ref().unwrap_err().message.contains("ECONNRESET"));
    }

    #[tokio::test]
    async fn test_scripts_advance_per_open_and_cycle() {
        let source = ScriptedSource::new(vec![
            vec![ScriptStep::token("first"), ScriptStep::Complete],
            vec![ScriptStep::token("second"), ScriptStep::Complete],
        ]);

        for expected in ["first", "second", "first"] {
            let stream = source.open(&StreamRequest::default()).await.unwrap();
            let events = drain(stream).await;
            assert_eq!(*events[0].as_ref().unwrap(), StreamEvent::token(expected));
        }
        assert_eq!(source.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_steps_delay_emission() {
        let source = ScriptedSource::single(vec![
            ScriptStep::wait_ms(250),
            ScriptStep::token("late"),
            ScriptStep::Complete,
        ]);
        let mut stream = source.open(&StreamRequest::default()).await.unwrap();

        let started = tokio::time::Instant::now();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, StreamEvent::token("late"));
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let source = ScriptedSource::completing(&["x"]);
        let request = StreamRequest {
            attempt: 2,
            is_retry: true,
            ..Default::default()
        };
        let _ = source.open(&request).await.unwrap();

        let recorded = source.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].attempt, 2);
        assert!(recorded[0].is_retry);
    }

    #[tokio::test]
    async fn test_complete_with_usage() {
        let source = ScriptedSource::single(vec![ScriptStep::CompleteWith(Usage {
            prompt_tokens: Some(5),
            completion_tokens: Some(7),
            total_tokens: Some(12),
        })]);
        let stream = source.open(&StreamRequest::default()).await.unwrap();
        let events = drain(stream).await;
        match events[0].as_ref().unwrap() {
            StreamEvent::Complete { usage: Some(u) } => {
                assert_eq!(u.total_tokens, Some(12));
            }
            other => panic!("expected complete with usage, got {:?}", other),
        }
    }
}
