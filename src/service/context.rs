//! Request-scoped contexts.
//!
//! A [`StreamContext`] is a cancellation token plus an optional deadline.
//! Listeners own a governing context; every accepted stream gets a fresh one
//! from a [`StreamContextFn`], which may add a timeout or hand back the
//! governing context unmodified.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// The context, or one of its parents, was cancelled.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
}

/// Cancellation scope with an optional deadline.
#[derive(Debug, Clone)]
pub struct StreamContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl StreamContext {
    /// A root context that only ends when cancelled.
    pub fn background() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// A context governed by an existing token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context, cancelled with `self` but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child context that also ends `timeout` from now. An earlier parent
    /// deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    /// Cancel this context and its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the context has already ended.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Wait for the context to end.
    pub async fn done(&self) -> DoneReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => DoneReason::Cancelled,
                _ = tokio::time::sleep_until(deadline) => DoneReason::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DoneReason::Cancelled
            }
        }
    }
}

/// Produces the context for each accepted stream.
pub type StreamContextFn = Arc<dyn Fn() -> StreamContext + Send + Sync>;

/// Context factory over a governing context. A missing or zero timeout
/// hands out the governing context unmodified.
pub fn stream_context_fn(governing: StreamContext, timeout: Option<Duration>) -> StreamContextFn {
    match timeout.filter(|t| !t.is_zero()) {
        Some(timeout) => Arc::new(move || governing.with_timeout(timeout)),
        None => Arc::new(move || governing.clone()),
    }
}
