//! Caller-supplied cancellation and deadline.
//!
//! A `Context` is passed into every engine operation. Each suspension point
//! (network round trip, backoff sleep, token exchange) races against it, so a
//! cancelled or expired context makes the operation return promptly with a
//! `Cancelled` error instead of running to completion.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Cancelled {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child that expires `timeout` from now (or at the parent's
    /// deadline, whichever comes first). A timeout too large to represent as
    /// an instant adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Derive a child with the given deadline. Deadlines only shrink; a later
    /// deadline than the parent's is ignored.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child that can be cancelled independently of its parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            return Err(Cancelled::Canceled);
        }
        match self.deadline {
            Some(at) if at <= Instant::now() => Err(Cancelled::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Cancelled {
        match self.deadline {
            Some(at) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Cancelled::Canceled,
                _ = tokio::time::sleep_until(at) => Cancelled::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Cancelled::Canceled
            }
        }
    }

    /// Run `fut` to completion unless the context stops first, in which case
    /// `fut` is dropped.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = fut => Ok(output),
        }
    }

    /// Interruptible sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.run(tokio::time::sleep(duration)).await
    }
}
