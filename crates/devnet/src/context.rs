//! Cancellable execution contexts with optional deadlines.

use std::{future::Future, time::Duration};

use derive_more::{Display, Error};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum CtxError {
    #[display("context cancelled")]
    Cancelled,
    #[display("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation scope threaded through every blocking operation.
///
/// Deriving a context creates a child: cancelling the parent cancels every child, and a child's
/// deadline is never later than its parent's.
#[derive(Debug, Clone)]
pub struct Ctx {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Ctx {
    fn default() -> Self {
        Self::background()
    }
}

impl Ctx {
    /// A root context with no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A child context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(candidate, |d| d.min(candidate))),
        }
    }

    /// A child context that can be cancelled independently of its parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn err(&self) -> Option<CtxError> {
        if self.token.is_cancelled() {
            return Some(CtxError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CtxError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> CtxError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => CtxError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => CtxError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                CtxError::Cancelled
            }
        }
    }

    /// Sleep for `period`, returning early with an error if the context ends first.
    pub async fn sleep(&self, period: Duration) -> Result<(), CtxError> {
        tokio::select! {
            err = self.done() => Err(err),
            _ = tokio::time::sleep(period) => Ok(()),
        }
    }

    /// Run `fut` bounded by this context.
    pub async fn run<T, F>(&self, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err.into());
        }
        tokio::select! {
            biased;
            res = fut => res,
            err = self.done() => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = Ctx::background().with_timeout(Duration::from_secs(1));
        assert!(ctx.err().is_none());

        assert_eq!(ctx.done().await, CtxError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(CtxError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_parent_cancel_propagates_to_child() {
        let parent = Ctx::background();
        let child = parent.with_timeout(Duration::from_secs(60));

        parent.cancel();

        assert_eq!(child.done().await, CtxError::Cancelled);
        assert!(child.is_done());
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_touch_parent() {
        let parent = Ctx::background();
        let child = parent.child();

        child.cancel();

        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_never_exceeds_parent() {
        let parent = Ctx::background().with_timeout(Duration::from_secs(5));
        let child = parent.with_timeout(Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_is_bounded_by_deadline() {
        let ctx = Ctx::background().with_timeout(Duration::from_millis(100));

        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<CtxError>(),
            Some(&CtxError::DeadlineExceeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_returns_early_on_cancel() {
        let ctx = Ctx::background();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        assert_eq!(ctx.sleep(Duration::from_secs(60)).await, Err(CtxError::Cancelled));
    }
}
