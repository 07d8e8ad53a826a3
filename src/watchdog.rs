//! Stream wrapper enforcing first-token and inter-token deadlines.
//!
//! [`Watchdog::next`] wraps each read of the canonical event stream in a
//! race against the active deadline and the abort handle. Deadlines are
//! rearmed atomically with event delivery: once a deadline fires, no further
//! event is delivered from the wrapped stream.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::debug;

use crate::abort::AbortHandle;
use crate::error::{ErrorCode, L0Error, Result};
use crate::event::StreamEvent;
use crate::source::EventStream;

/// Deadlines applied to a provider stream. `None` disables a deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutConfig {
    /// Time allowed from acquisition to the first value-bearing event.
    pub initial_token: Option<Duration>,
    /// Time allowed between consecutive value-bearing events.
    pub inter_token: Option<Duration>,
}

impl TimeoutConfig {
    /// Set the initial-token deadline in milliseconds.
    pub fn initial_token_ms(mut self, ms: u64) -> Self {
        self.initial_token = Some(Duration::from_millis(ms));
        self
    }

    /// Set the inter-token deadline in milliseconds.
    pub fn inter_token_ms(mut self, ms: u64) -> Self {
        self.inter_token = Some(Duration::from_millis(ms));
        self
    }
}

/// Deadline state for one attempt's stream.
#[derive(Debug)]
pub struct Watchdog {
    config: TimeoutConfig,
    got_first: bool,
    deadline: Option<Instant>,
}

impl Watchdog {
    /// Arm the initial-token deadline from now.
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            got_first: false,
            deadline: config.initial_token.map(|d| Instant::now() + d),
        }
    }

    /// Read the next event, racing the active deadline and the abort handle.
    ///
    /// Only value-bearing events rearm the deadline; progress events tick
    /// the clock down like silence does. `Ok(None)` is end-of-stream.
    pub async fn next(
        &mut self,
        stream: &mut EventStream,
        abort: &AbortHandle,
    ) -> Result<Option<StreamEvent>> {
        let deadline = self.deadline;
        let expiry = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = abort.aborted() => {
                debug!("abort observed while awaiting provider event");
                Err(L0Error::new(ErrorCode::StreamAborted, "stream aborted"))
            }
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    if event.is_value_bearing() {
                        self.got_first = true;
                        self.deadline = self.config.inter_token.map(|d| Instant::now() + d);
                    }
                    Ok(Some(event))
                }
                Some(Err(err)) => Err(err),
                None => Ok(None),
            },
            _ = expiry => {
                let err = self.timeout_error();
                debug!(code = %err.code, "stream deadline expired");
                Err(err)
            }
        }
    }

    fn timeout_error(&self) -> L0Error {
        if self.got_first {
            let ms = self
                .config
                .inter_token
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            L0Error::inter_token_timeout(ms)
        } else {
            let ms = self
                .config
                .initial_token
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            L0Error::initial_token_timeout(ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    /// Build an event stream where each item arrives after its own delay.
    fn delayed_stream(items: Vec<(u64, Result<StreamEvent>)>) -> EventStream {
        Box::pin(stream::unfold(
            items.into_iter().collect::<std::collections::VecDeque<_>>(),
            |mut queue| async move {
                let (delay_ms, item) = queue.pop_front()?;
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Some((item, queue))
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadlines_passes_events_through() {
        let mut stream = delayed_stream(vec![
            (0, Ok(StreamEvent::token("a"))),
            (500, Ok(StreamEvent::Complete { usage: None })),
        ]);
        let mut watchdog = Watchdog::new(TimeoutConfig::default());
        let abort = AbortHandle::new();

        assert_eq!(
            watchdog.next(&mut stream, &abort).await.unwrap(),
            Some(StreamEvent::token("a"))
        );
        assert!(matches!(
            watchdog.next(&mut stream, &abort).await.unwrap(),
            Some(StreamEvent::Complete { .. })
        ));
        assert_eq!(watchdog.next(&mut stream, &abort).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_token_timeout_fires() {
        let mut stream = delayed_stream(vec![(200, Ok(StreamEvent::token("late")))]);
        let mut watchdog = Watchdog::new(TimeoutConfig::default().initial_token_ms(50));
        let abort = AbortHandle::new();

        let err = watchdog.next(&mut stream, &abort).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InitialTokenTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_token_timeout_fires_after_first() {
        let mut stream = delayed_stream(vec![
            (0, Ok(StreamEvent::token("a"))),
            (200, Ok(StreamEvent::token("b"))),
        ]);
        let mut watchdog = Watchdog::new(
            TimeoutConfig::default()
                .initial_token_ms(1000)
                .inter_token_ms(50),
        );
        let abort = AbortHandle::new();

        assert!(watchdog.next(&mut stream, &abort).await.unwrap().is_some());
        let err = watchdog.next(&mut stream, &abort).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InterTokenTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_does_not_rearm_deadline() {
        let progress = StreamEvent::Progress {
            percent: Some(10.0),
            step: None,
            total_steps: None,
            message: None,
            eta_ms: None,
        };
        let mut stream = delayed_stream(vec![
            (0, Ok(StreamEvent::token("a"))),
            (60, Ok(progress)),
            (60, Ok(StreamEvent::token("b"))),
        ]);
        let mut watchdog = Watchdog::new(TimeoutConfig::default().inter_token_ms(100));
        let abort = AbortHandle::new();

        // Token at t=0 arms the 100ms deadline; progress at t=60 is passed
        // through without rearming, so the token due at t=120 is too late.
        assert!(watchdog.next(&mut stream, &abort).await.unwrap().is_some());
        assert!(matches!(
            watchdog.next(&mut stream, &abort).await.unwrap(),
            Some(StreamEvent::Progress { .. })
        ));
        let err = watchdog.next(&mut stream, &abort).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InterTokenTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_bearing_event_rearms_deadline() {
        let mut stream = delayed_stream(vec![
            (0, Ok(StreamEvent::token("a"))),
            (80, Ok(StreamEvent::token("b"))),
            (80, Ok(StreamEvent::token("c"))),
        ]);
        let mut watchdog = Watchdog::new(TimeoutConfig::default().inter_token_ms(100));
        let abort = AbortHandle::new();

        // Each gap is 80ms, under the 100ms deadline, so all three arrive.
        for expected in ["a", "b", "c"] {
            assert_eq!(
                watchdog.next(&mut stream, &abort).await.unwrap(),
                Some(StreamEvent::token(expected))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_wins_over_pending_read() {
        let mut stream = delayed_stream(vec![(10_000, Ok(StreamEvent::token("never")))]);
        let mut watchdog = Watchdog::new(TimeoutConfig::default());
        let abort = AbortHandle::new();
        abort.abort();

        let err = watchdog.next(&mut stream, &abort).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::StreamAborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_propagates() {
        let mut stream = delayed_stream(vec![(0, Err(L0Error::network("ECONNRESET")))]);
        let mut watchdog = Watchdog::new(TimeoutConfig::default());
        let abort = AbortHandle::new();

        let err = watchdog.next(&mut stream, &abort).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NetworkError);
    }
}
