//! The orchestrator: attempt loop, event dispatch, and recovery.
//!
//! [`run`] spawns the orchestrator task and returns an [`L0Result`] whose
//! event stream the caller drains. The orchestrator acquires one provider
//! stream per attempt, pushes every canonical event through the watchdog,
//! runs guardrail/drift/checkpoint work at the configured intervals, and on
//! failure classifies the error and enacts retry, fallback, or halt.
//!
//! Event delivery uses a capacity-1 channel, so the orchestrator runs at
//! most one event ahead of the caller and back-pressure propagates to the
//! provider read.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::abort::AbortHandle;
use crate::classify::{
    classify_network_message, network_type_of, plan, Action, NetworkErrorRecord,
    NetworkErrorType, RetryClass,
};
use crate::continuation::{default_continuation_prompt, ContinuationFilter};
use crate::drift::{drift_violation, DriftReport};
use crate::error::{ErrorCategory, ErrorCode, L0Error, Result};
use crate::event::{StreamEvent, Usage};
use crate::guardrail::{self, GuardrailContext, Violation};
use crate::interceptor::{self, AttemptCtx};
use crate::observer::{emit, FallbackInfo, RetryInfo, TimeoutKind};
use crate::options::L0Options;
use crate::source::normalize::ToolCall;
use crate::source::{ContinuationHint, StreamRequest};
use crate::state::{RunState, SharedState};
use crate::telemetry::{TelemetryRecorder, TelemetryReport};
use crate::watchdog::Watchdog;

/// Handle to a running stream.
///
/// Drain events through [`next_event`](L0Result::next_event) (or the
/// [`Stream`] impl); the running state is observable at any point through
/// [`state`](L0Result::state) and final once the stream ends. On a halt the
/// last event is the terminal `StreamError` and
/// [`final_error`](L0Result::final_error) carries the structured error.
pub struct L0Result {
    events: mpsc::Receiver<StreamEvent>,
    state: SharedState,
    errors: Arc<Mutex<Vec<L0Error>>>,
    final_error: Arc<Mutex<Option<L0Error>>>,
    telemetry: Arc<Mutex<Option<TelemetryReport>>>,
    abort: AbortHandle,
}

impl L0Result {
    /// Receive the next canonical event. `None` means the run terminated.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Snapshot the running state.
    pub fn state(&self) -> RunState {
        self.state.snapshot()
    }

    /// Errors recorded per attempt, recovered ones included.
    pub fn errors(&self) -> Vec<L0Error> {
        self.errors.lock().expect("errors lock poisoned").clone()
    }

    /// The terminal error, when the run halted or was aborted.
    pub fn final_error(&self) -> Option<L0Error> {
        self.final_error
            .lock()
            .expect("final error lock poisoned")
            .clone()
    }

    /// Aggregated telemetry, available after termination when enabled.
    pub fn telemetry(&self) -> Option<TelemetryReport> {
        self.telemetry
            .lock()
            .expect("telemetry lock poisoned")
            .clone()
    }

    /// Request cancellation. Idempotent.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// A clone of the abort handle, usable from other tasks.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Drain the remaining events and return the terminal state, or the
    /// terminal error if the run halted.
    pub async fn wait(&mut self) -> Result<RunState> {
        while self.next_event().await.is_some() {}
        match self.final_error() {
            Some(err) => Err(err),
            None => Ok(self.state()),
        }
    }
}

impl Stream for L0Result {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl std::fmt::Debug for L0Result {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L0Result")
            .field("aborted", &self.abort.is_aborted())
            .field("final_error", &self.final_error())
            .finish()
    }
}

/// Start a run. Must be called within a tokio runtime; the orchestrator is
/// spawned immediately and fills the returned result as the caller drains it.
pub fn run(options: L0Options) -> L0Result {
    let (tx, rx) = mpsc::channel(1);
    let state = SharedState::new();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let final_error = Arc::new(Mutex::new(None));
    let telemetry = Arc::new(Mutex::new(None));
    let abort = options.abort.clone();

    let recorder = TelemetryRecorder::new(
        options.continue_from_checkpoint,
        !options.guardrails.is_empty(),
    );
    let engine = Engine {
        opts: options,
        shared: state.clone(),
        tx,
        errors: errors.clone(),
        final_error: final_error.clone(),
        telemetry_slot: telemetry.clone(),
        recorder,
    };
    tokio::spawn(engine.run());

    L0Result {
        events: rx,
        state,
        errors,
        final_error,
        telemetry,
        abort,
    }
}

fn abort_sentinel() -> L0Error {
    L0Error::new(ErrorCode::StreamAborted, "stream aborted")
}

/// Per-attempt bookkeeping.
struct Attempt {
    ctx: AttemptCtx,
    resuming: bool,
    filter: Option<ContinuationFilter>,
    dedup_recorded: bool,
    resume_offset_pending: bool,
    drift_report: Option<DriftReport>,
}

struct Engine {
    opts: L0Options,
    shared: SharedState,
    tx: mpsc::Sender<StreamEvent>,
    errors: Arc<Mutex<Vec<L0Error>>>,
    final_error: Arc<Mutex<Option<L0Error>>>,
    telemetry_slot: Arc<Mutex<Option<TelemetryReport>>>,
    recorder: TelemetryRecorder,
}

impl Engine {
    async fn run(mut self) {
        if self.opts.build_continuation_prompt.is_some() && !self.opts.continue_from_checkpoint {
            self.halt(L0Error::feature_not_enabled(
                "continue_from_last_known_good_token",
            ))
            .await;
            return;
        }

        let mut attempt_number: u32 = 0;
        let mut is_retry = false;
        let mut is_fallback = false;

        loop {
            attempt_number += 1;
            let resuming = attempt_number > 1
                && self.opts.continue_from_checkpoint
                && self.shared.update(|s| !s.checkpoint.is_empty());
            if attempt_number > 1 {
                self.shared.update(|s| s.begin_attempt(resuming));
            }

            let ctx = AttemptCtx {
                attempt: attempt_number,
                is_retry,
                is_fallback,
                fallback_index: self.shared.update(|s| s.fallback_index),
            };
            emit(&self.opts.observer, |o| o.on_start(&ctx));

            let mut attempt = Attempt {
                ctx,
                resuming,
                filter: None,
                dedup_recorded: false,
                resume_offset_pending: false,
                drift_report: None,
            };

            match self.run_attempt(&mut attempt).await {
                Ok(usage) => {
                    let final_state = self.shared.snapshot();
                    if let Err(err) =
                        interceptor::run_after(&self.opts.interceptors, &attempt.ctx, &final_state)
                    {
                        self.halt(err).await;
                        return;
                    }
                    if self.deliver(StreamEvent::Complete { usage }).await.is_err() {
                        self.finalize_abort().await;
                        return;
                    }
                    self.finish_success().await;
                    return;
                }
                Err(err) if err.code == ErrorCode::StreamAborted => {
                    self.finalize_abort().await;
                    return;
                }
                Err(err) => {
                    match err.code {
                        ErrorCode::InitialTokenTimeout => {
                            emit(&self.opts.observer, |o| {
                                o.on_timeout(TimeoutKind::InitialToken)
                            });
                        }
                        ErrorCode::InterTokenTimeout => {
                            emit(&self.opts.observer, |o| o.on_timeout(TimeoutKind::InterToken));
                        }
                        _ => {}
                    }

                    let err = err.with_context(self.shared.update(|s| s.error_context()));
                    warn!(code = %err.code, category = %err.category, message = %err.message, "attempt failed");
                    self.errors
                        .lock()
                        .expect("errors lock poisoned")
                        .push(err.clone());
                    interceptor::run_on_error(&self.opts.interceptors, &attempt.ctx, &err);

                    if let Some(kind) = network_type_of(&err) {
                        self.shared.update(|s| {
                            s.network_errors
                                .push(NetworkErrorRecord::new(kind, &err.message))
                        });
                    }
                    // The failing attempt consumes the model budget before
                    // planning; `attempts` counts budget-consuming attempts.
                    if err.category.consumes_model_budget() {
                        self.shared.update(|s| s.model_retry_count += 1);
                    }

                    let snapshot = self.shared.snapshot();
                    let action = plan(&err, &snapshot, &self.opts.retry, self.opts.fallbacks.len());
                    match action {
                        Action::Retry { class, delay } => {
                            let retry_index = match class {
                                RetryClass::Network => self.shared.update(|s| {
                                    s.network_retry_count += 1;
                                    s.network_retry_count - 1
                                }),
                                RetryClass::Model => {
                                    snapshot.model_retry_count.saturating_sub(1)
                                }
                            };
                            let info = RetryInfo {
                                retry_index,
                                class,
                                delay,
                                reason: err.message.clone(),
                            };
                            emit(&self.opts.observer, |o| o.on_retry(&info));
                            debug!(?class, ?delay, "retrying current factory");
                            if self.sleep_or_abort(delay).await.is_err() {
                                self.finalize_abort().await;
                                return;
                            }
                            is_retry = true;
                            is_fallback = false;
                        }
                        Action::Fallback { delay } => {
                            let info = FallbackInfo {
                                from_index: snapshot.fallback_index,
                                to_index: snapshot.fallback_index + 1,
                                reason: err.message.clone(),
                            };
                            self.shared.update(|s| {
                                s.fallback_index += 1;
                                s.model_retry_count = 0;
                            });
                            emit(&self.opts.observer, |o| o.on_fallback(&info));
                            debug!(to = info.to_index, "switching to fallback factory");
                            if self.sleep_or_abort(delay).await.is_err() {
                                self.finalize_abort().await;
                                return;
                            }
                            is_retry = false;
                            is_fallback = true;
                        }
                        Action::Halt { exhausted } => {
                            let final_err = if exhausted {
                                L0Error::all_streams_exhausted(&err)
                                    .with_context(err.context.clone())
                            } else {
                                err
                            };
                            self.halt(final_err).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One acquisition-and-drain. `Ok(usage)` means the provider completed
    /// and post-phase checks passed; the `Complete` event is not yet
    /// delivered.
    async fn run_attempt(&mut self, attempt: &mut Attempt) -> Result<Option<Usage>> {
        interceptor::run_before(&self.opts.interceptors, &attempt.ctx)?;

        let mut request = StreamRequest {
            attempt: attempt.ctx.attempt,
            is_retry: attempt.ctx.is_retry,
            is_fallback: attempt.ctx.is_fallback,
            fallback_index: attempt.ctx.fallback_index,
            continuation: None,
        };

        if attempt.resuming {
            let (checkpoint, checkpoint_tokens) = self
                .shared
                .update(|s| (s.checkpoint.clone(), s.checkpoint_tokens));
            let prompt = match self.opts.build_continuation_prompt {
                Some(ref build) => build(&checkpoint),
                None => default_continuation_prompt(&checkpoint),
            };
            request.continuation = Some(ContinuationHint {
                checkpoint: checkpoint.clone(),
                token_count: checkpoint_tokens,
                prompt,
            });
            self.shared.update(|s| s.mark_resumed());
            self.recorder.record_resume();
            emit(&self.opts.observer, |o| {
                o.on_resume(&checkpoint, checkpoint_tokens)
            });
            if self.opts.deduplicate_continuation {
                attempt.filter = Some(ContinuationFilter::new(&checkpoint, self.opts.dedup.clone()));
            }
            attempt.resume_offset_pending = true;
            debug!(
                checkpoint_chars = checkpoint.chars().count(),
                "resuming from checkpoint"
            );
        }

        let source = if attempt.ctx.fallback_index == 0 {
            self.opts.source.clone()
        } else {
            self.opts.fallbacks[(attempt.ctx.fallback_index - 1) as usize].clone()
        };
        debug!(
            source = source.name(),
            attempt = attempt.ctx.attempt,
            "acquiring provider stream"
        );

        let mut stream = tokio::select! {
            biased;
            _ = self.opts.abort.aborted() => return Err(abort_sentinel()),
            opened = source.open(&request) => opened?,
        };

        let mut watchdog = Watchdog::new(self.opts.timeout);
        loop {
            match watchdog.next(&mut stream, &self.opts.abort).await? {
                None => {
                    self.flush_filter(attempt).await?;
                    return Err(L0Error::network(
                        "provider stream ended without a completion frame (partial chunks)",
                    ));
                }
                Some(StreamEvent::Token { value }) => {
                    if value.is_empty() {
                        continue;
                    }
                    let text = match attempt.filter.as_mut() {
                        Some(filter) => filter.push(&value),
                        None => Some(value),
                    };
                    self.note_dedup(attempt);
                    if let Some(text) = text {
                        if !text.is_empty() {
                            self.handle_token(attempt, text).await?;
                        }
                    }
                }
                Some(event @ StreamEvent::Message { .. })
                | Some(event @ StreamEvent::Data(_))
                | Some(event @ StreamEvent::Progress { .. }) => {
                    self.deliver(event).await?;
                }
                Some(StreamEvent::StreamError { error, reason }) => {
                    self.deliver(StreamEvent::StreamError {
                        error: error.clone(),
                        reason: reason.clone(),
                    })
                    .await?;
                    let message = match reason {
                        Some(reason) => format!("{} ({})", error, reason),
                        None => error,
                    };
                    return Err(
                        if classify_network_message(&message) != NetworkErrorType::Unknown {
                            L0Error::network(message)
                        } else {
                            L0Error::with_category(
                                ErrorCode::ProviderError,
                                ErrorCategory::Provider,
                                message,
                            )
                        },
                    );
                }
                Some(StreamEvent::Complete { usage }) => {
                    self.flush_filter(attempt).await?;
                    self.post_phase(attempt)?;
                    return Ok(usage);
                }
            }
        }
    }

    /// Post-completion checks: zero output, all guardrails, pending drift.
    fn post_phase(&mut self, attempt: &Attempt) -> Result<()> {
        let snapshot = self.shared.snapshot();

        if self.opts.detect_zero_tokens
            && (snapshot.token_count == 0 || snapshot.content.trim().is_empty())
        {
            let violation = guardrail::zero_output_violation();
            self.record_violations(std::slice::from_ref(&violation));
            return Err(L0Error::zero_output());
        }

        if !self.opts.guardrails.is_empty() {
            let ctx = GuardrailContext {
                content: &snapshot.content,
                checkpoint: (!snapshot.checkpoint.is_empty()).then_some(snapshot.checkpoint.as_str()),
                delta: None,
                token_count: snapshot.token_count,
                completed: true,
            };
            let outcome = guardrail::evaluate(&self.opts.guardrails, &ctx);
            self.record_violations(&outcome.violations);
            if let Some(violation) = outcome.halting_violation() {
                return Err(L0Error::fatal_guardrail(&violation.rule, &violation.message));
            }
            if let Some(violation) = outcome.retry_violation() {
                return Err(L0Error::guardrail(&violation.rule, &violation.message));
            }
        }

        if let Some(ref report) = attempt.drift_report {
            return Err(L0Error::drift(report.kinds_string()));
        }
        Ok(())
    }

    /// Append a token, deliver it, and run the interval checks.
    async fn handle_token(&mut self, attempt: &mut Attempt, text: String) -> Result<()> {
        let set_resume_offset = std::mem::take(&mut attempt.resume_offset_pending);
        let token_count = self.shared.update(|s| {
            if set_resume_offset {
                s.resume_from = Some(s.content_chars());
            }
            s.record_token(&text);
            s.token_count
        });

        self.deliver(StreamEvent::Token { value: text }).await?;

        let intervals = self.opts.intervals;

        if intervals.checkpoint > 0 && token_count % intervals.checkpoint == 0 {
            let (checkpoint, tokens) = self.shared.update(|s| {
                s.mark_checkpoint();
                (s.checkpoint.clone(), s.checkpoint_tokens)
            });
            emit(&self.opts.observer, |o| o.on_checkpoint(&checkpoint, tokens));
        }

        if intervals.guardrails > 0
            && token_count % intervals.guardrails == 0
            && self.opts.guardrails.iter().any(|g| g.streaming)
        {
            let snapshot = self.shared.snapshot();
            let ctx = GuardrailContext {
                content: &snapshot.content,
                checkpoint: (!snapshot.checkpoint.is_empty()).then_some(snapshot.checkpoint.as_str()),
                delta: None,
                token_count: snapshot.token_count,
                completed: false,
            };
            let outcome = guardrail::evaluate(&self.opts.guardrails, &ctx);
            self.record_violations(&outcome.violations);
            if let Some(violation) = outcome.halting_violation() {
                debug!(rule = %violation.rule, "streaming guardrail halted the attempt");
                return Err(L0Error::fatal_guardrail(&violation.rule, &violation.message));
            }
        }

        if self.opts.detect_drift
            && intervals.drift > 0
            && token_count % intervals.drift == 0
            && attempt.drift_report.is_none()
        {
            let content = self.shared.update(|s| s.content.clone());
            let report = self.opts.drift_detector.analyze(&content);
            if report.detected {
                debug!(kinds = %report.kinds_string(), "drift detected");
                self.recorder.record_drift(&report);
                let violation = drift_violation(&report);
                self.shared.update(|s| {
                    s.drift_detected = true;
                    s.violations.push(violation.clone());
                });
                emit(&self.opts.observer, |o| {
                    o.on_drift(&report);
                    o.on_violation(&violation);
                });
                attempt.drift_report = Some(report);
            }
        }

        Ok(())
    }

    /// Resolve any trailing dedup buffer at end of stream.
    async fn flush_filter(&mut self, attempt: &mut Attempt) -> Result<()> {
        let text = attempt.filter.as_mut().and_then(|f| f.finish());
        self.note_dedup(attempt);
        if let Some(text) = text {
            if !text.is_empty() {
                self.handle_token(attempt, text).await?;
            }
        }
        Ok(())
    }

    fn note_dedup(&mut self, attempt: &mut Attempt) {
        if attempt.dedup_recorded {
            return;
        }
        if let Some(ref filter) = attempt.filter {
            if filter.resolved() {
                attempt.dedup_recorded = true;
                self.recorder.record_dedup(filter.dropped_chars());
            }
        }
    }

    fn record_violations(&mut self, violations: &[Violation]) {
        for violation in violations {
            self.shared.update(|s| s.violations.push(violation.clone()));
            emit(&self.opts.observer, |o| o.on_violation(violation));
        }
    }

    /// Deliver one event to the caller. `on_event` happens before delivery.
    async fn deliver(&mut self, event: StreamEvent) -> Result<()> {
        emit(&self.opts.observer, |o| o.on_event(&event));
        if let StreamEvent::Message { ref value, .. } = event {
            if let Some(call) = ToolCall::from_message_value(value) {
                emit(&self.opts.observer, |o| o.on_tool_call(&call));
            }
        }
        tokio::select! {
            biased;
            _ = self.opts.abort.aborted() => Err(abort_sentinel()),
            sent = self.tx.send(event) => {
                sent.map_err(|_| L0Error::new(
                    ErrorCode::StreamAborted,
                    "consumer dropped the event stream",
                ))
            }
        }
    }

    async fn sleep_or_abort(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.opts.abort.aborted() => Err(abort_sentinel()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn finish_success(&mut self) {
        let snapshot = self.shared.update(|s| {
            s.completed = true;
            s.duration = Some(s.started_at.elapsed());
            s.clone()
        });
        emit(&self.opts.observer, |o| o.on_complete(&snapshot));
        if self.opts.telemetry {
            *self.telemetry_slot.lock().expect("telemetry lock poisoned") =
                Some(self.recorder.finalize(&snapshot));
        }
        debug!(
            tokens = snapshot.token_count,
            chars = snapshot.content.len(),
            "run completed"
        );
    }

    /// Terminal halt: record the error, notify, emit the final error event.
    async fn halt(&mut self, err: L0Error) {
        let snapshot = self.shared.update(|s| {
            s.duration = Some(s.started_at.elapsed());
            s.clone()
        });
        warn!(code = %err.code, "run halted: {}", err.message);
        emit(&self.opts.observer, |o| o.on_error(&err));
        *self
            .final_error
            .lock()
            .expect("final error lock poisoned") = Some(err.clone());
        if self.opts.telemetry {
            *self.telemetry_slot.lock().expect("telemetry lock poisoned") =
                Some(self.recorder.finalize(&snapshot));
        }
        let event = StreamEvent::StreamError {
            error: err.message.clone(),
            reason: Some(err.code.as_str().to_string()),
        };
        tokio::select! {
            biased;
            _ = self.opts.abort.aborted() => {}
            _ = self.tx.send(event) => {}
        }
    }

    /// Terminal abort: no further events, error carries the partial state.
    async fn finalize_abort(&mut self) {
        let (token_count, content_len, context) = self.shared.update(|s| {
            s.duration = Some(s.started_at.elapsed());
            (s.token_count, s.content.chars().count(), s.error_context())
        });
        let err = L0Error::aborted(token_count, content_len).with_context(context);
        debug!(tokens = token_count, chars = content_len, "run aborted");
        emit(&self.opts.observer, |o| o.on_error(&err));
        emit(&self.opts.observer, |o| o.on_abort(token_count, content_len));
        *self
            .final_error
            .lock()
            .expect("final error lock poisoned") = Some(err);
        if self.opts.telemetry {
            let snapshot = self.shared.snapshot();
            *self.telemetry_slot.lock().expect("telemetry lock poisoned") =
                Some(self.recorder.finalize(&snapshot));
        }
    }
}
