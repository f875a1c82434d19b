//! Per-call cancellation and deadline propagation.
//!
//! Every resource manager call receives a [`Context`]. Managers race their
//! network I/O against [`Context::done`] so a cancelled or expired pass
//! returns promptly with a cancellation-class error instead of hanging.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Reason a [`Context`] stopped accepting work.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum ContextError {
    /// The context was cancelled explicitly.
    #[error("context canceled")]
    Canceled,
    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline threaded through one pass.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Creates a context that never expires on its own.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Creates a context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derives a child context. Cancelling the parent cancels the child but
    /// not the other way round; the deadline is inherited.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Reports why the context is done, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns `true` once the context is cancelled or expired.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => ContextError::Canceled,
                    () = sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }

    /// Drives `future` to completion unless the context fires first.
    ///
    /// A context that is already done short-circuits without polling the
    /// future.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when the context is cancelled or expires
    /// before `future` completes.
    pub async fn run<F, T>(&self, future: F) -> Result<T, ContextError>
    where
        F: Future<Output = T>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            value = future => Ok(value),
        }
    }
}
