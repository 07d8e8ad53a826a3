//! Running state owned by the orchestrator.
//!
//! One [`RunState`] exists per run. Only the orchestrator task mutates it;
//! callers observe it through [`SharedState::snapshot`], which hands out a
//! clone. The state is final once `completed` is set or a terminal error has
//! been recorded.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::classify::NetworkErrorRecord;
use crate::error::ErrorContext;
use crate::guardrail::Violation;

/// Accumulated state of a single run.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Canonical output, appended to on each token event.
    pub content: String,
    /// Last known-good prefix of `content`. May lag behind `content`.
    pub checkpoint: String,
    /// Tokens counted when the checkpoint was taken.
    pub checkpoint_tokens: u32,
    /// Value-bearing token events counted in the current attempt.
    pub token_count: u32,
    /// When the first token of the current attempt arrived.
    pub first_token_at: Option<Instant>,
    /// When the most recent token arrived.
    pub last_token_at: Option<Instant>,
    /// When the run started.
    pub started_at: Instant,
    /// Total run duration, recorded at termination.
    pub duration: Option<Duration>,
    /// Retries that consumed the model budget.
    pub model_retry_count: u32,
    /// Network-class retries. Never affects the model budget.
    pub network_retry_count: u32,
    /// Active factory: 0 = primary, k = the k-th fallback.
    pub fallback_index: u32,
    /// All violations observed across the run.
    pub violations: Vec<Violation>,
    /// Whether drift was detected at any point.
    pub drift_detected: bool,
    /// Whether the run completed successfully.
    pub completed: bool,
    /// Categorized network errors observed across the run.
    pub network_errors: Vec<NetworkErrorRecord>,
    /// Whether any attempt resumed from a checkpoint.
    pub resumed: bool,
    /// The checkpoint the last resume started from.
    pub resume_point: Option<String>,
    /// Char offset into `content` where resumed output begins after dedup.
    pub resume_from: Option<usize>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            checkpoint: String::new(),
            checkpoint_tokens: 0,
            token_count: 0,
            first_token_at: None,
            last_token_at: None,
            started_at: Instant::now(),
            duration: None,
            model_retry_count: 0,
            network_retry_count: 0,
            fallback_index: 0,
            violations: Vec::new(),
            drift_detected: false,
            completed: false,
            network_errors: Vec::new(),
            resumed: false,
            resume_point: None,
            resume_from: None,
        }
    }

    /// Append a non-empty token delta and update counters and timestamps.
    pub fn record_token(&mut self, delta: &str) {
        debug_assert!(!delta.is_empty(), "empty deltas are filtered upstream");
        let now = Instant::now();
        if self.first_token_at.is_none() {
            self.first_token_at = Some(now);
        }
        self.last_token_at = Some(now);
        self.content.push_str(delta);
        self.token_count += 1;
    }

    /// Declare the current content known-good.
    pub fn mark_checkpoint(&mut self) {
        self.checkpoint = self.content.clone();
        self.checkpoint_tokens = self.token_count;
    }

    /// Reset per-attempt counters for a new attempt.
    ///
    /// A cold attempt (no continuation) discards content and checkpoint; a
    /// continuation attempt rolls content back to the checkpoint so the
    /// checkpoint stays a prefix of content throughout the resume.
    pub fn begin_attempt(&mut self, continuation: bool) {
        self.token_count = 0;
        self.first_token_at = None;
        if continuation {
            self.content = self.checkpoint.clone();
        } else {
            self.content.clear();
            self.checkpoint.clear();
            self.checkpoint_tokens = 0;
        }
    }

    /// Mark the current attempt as a resume from the given checkpoint.
    pub fn mark_resumed(&mut self) {
        self.resumed = true;
        self.resume_point = Some(self.checkpoint.clone());
    }

    /// Chars of content, used for resume offsets and abort reporting.
    pub fn content_chars(&self) -> usize {
        self.content.chars().count()
    }

    /// Whether any fatal violation has been recorded.
    pub fn has_fatal_violation(&self) -> bool {
        self.violations.iter().any(|v| v.is_fatal())
    }

    /// Snapshot the counters into an error context.
    pub fn error_context(&self) -> ErrorContext {
        ErrorContext {
            checkpoint: if self.checkpoint.is_empty() {
                None
            } else {
                Some(self.checkpoint.clone())
            },
            token_count: self.token_count,
            model_retry_count: self.model_retry_count,
            network_retry_count: self.network_retry_count,
            fallback_index: self.fallback_index,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to the running state.
///
/// The orchestrator holds one clone and mutates through it; the result
/// surface holds another and only snapshots.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<RunState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunState::new())),
        }
    }

    /// Clone the current state.
    pub fn snapshot(&self) -> RunState {
        self.inner.lock().expect("state lock poisoned").clone()
    }

    /// Mutate the state under the lock. Orchestrator-only.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let mut guard = self.inner.lock().expect("state lock poisoned");
        f(&mut guard)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
