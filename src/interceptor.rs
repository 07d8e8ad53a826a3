//! Interceptors wrapping each attempt.
//!
//! An [`Interceptor`] runs `before` each stream acquisition, `after` each
//! successful attempt, and `on_error` when an attempt fails. Interceptor
//! failures are not recoverable provider errors; they surface as INTERNAL
//! and halt the run.

use crate::error::{L0Error, Result};
use crate::state::RunState;

/// Attempt context passed to interceptors and [`LifecycleObserver::on_start`].
///
/// [`LifecycleObserver::on_start`]: crate::observer::LifecycleObserver::on_start
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptCtx {
    /// Overall attempt number, 1-indexed.
    pub attempt: u32,
    /// Whether this attempt is a retry of the same factory.
    pub is_retry: bool,
    /// Whether this attempt runs on a fallback factory.
    pub is_fallback: bool,
    /// Active fallback index (0 = primary).
    pub fallback_index: u32,
}

/// Hooks around each attempt. All methods default to no-ops.
pub trait Interceptor: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &str {
        "interceptor"
    }

    /// Runs before the stream is acquired.
    fn before(&self, _ctx: &AttemptCtx) -> Result<()> {
        Ok(())
    }

    /// Runs after an attempt completes and passes post-phase guardrails.
    fn after(&self, _ctx: &AttemptCtx, _state: &RunState) -> Result<()> {
        Ok(())
    }

    /// Runs when an attempt fails, before recovery planning.
    fn on_error(&self, _ctx: &AttemptCtx, _error: &L0Error) -> Result<()> {
        Ok(())
    }
}

/// Run `before` hooks in order; the first failure propagates as INTERNAL.
pub(crate) fn run_before(interceptors: &[std::sync::Arc<dyn Interceptor>], ctx: &AttemptCtx) -> Result<()> {
    for interceptor in interceptors {
        interceptor
            .before(ctx)
            .map_err(|e| internal_wrap(interceptor.name(), "before", e))?;
    }
    Ok(())
}

/// Run `after` hooks in order; the first failure propagates as INTERNAL.
pub(crate) fn run_after(
    interceptors: &[std::sync::Arc<dyn Interceptor>],
    ctx: &AttemptCtx,
    state: &RunState,
) -> Result<()> {
    for interceptor in interceptors {
        interceptor
            .after(ctx, state)
            .map_err(|e| internal_wrap(interceptor.name(), "after", e))?;
    }
    Ok(())
}

/// Run `on_error` hooks in order. Hook failures are swallowed into the log;
/// the original attempt error keeps priority.
pub(crate) fn run_on_error(
    interceptors: &[std::sync::Arc<dyn Interceptor>],
    ctx: &AttemptCtx,
    error: &L0Error,
) {
    for interceptor in interceptors {
        if let Err(e) = interceptor.on_error(ctx, error) {
            tracing::warn!(
                interceptor = interceptor.name(),
                error = %e,
                "on_error interceptor failed"
            );
        }
    }
}

fn internal_wrap(name: &str, phase: &str, err: L0Error) -> L0Error {
    L0Error::internal(format!(
        "interceptor '{}' failed in {}: {}",
        name, phase, err
    ))
}
