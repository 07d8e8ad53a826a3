//! Idempotent cancellation shared by the caller, timeouts, and the runtime.
//!
//! One [`AbortHandle`] is observed at every suspension point: stream
//! acquisition, frame reads, retry sleeps, and guardrail boundaries. Abort
//! is cooperative; a provider connection that cannot be cancelled cleanly is
//! abandoned, never handed to the next attempt.

use tokio_util::sync::CancellationToken;

/// Cloneable cancellation handle. Calling [`abort`](AbortHandle::abort) any
/// number of times is safe and produces the same observable state.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation is requested. Safe to await at any
    /// suspension point; resolves immediately if already aborted.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_abort_is_idempotent() {
        let handle = AbortHandle::new();
        assert!(!handle.is_aborted());
        handle.abort();
        assert!(handle.is_aborted());
        handle.abort();
        handle.abort();
        assert!(handle.is_aborted());
    }

    #[test]
    fn test_clones_share_state() {
        let handle = AbortHandle::new();
        let clone = handle.clone();
        clone.abort();
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_aborted_resolves_after_abort() {
        let handle = AbortHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.aborted().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should resolve")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn test_aborted_resolves_immediately_when_already_aborted() {
        let handle = AbortHandle::new();
        handle.abort();
        tokio::time::timeout(Duration::from_millis(50), handle.aborted())
            .await
            .expect("should resolve immediately");
    }
}
