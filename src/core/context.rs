//! Request context management
//!
//! This module provides the [`RequestContext`] that carries the cancellation
//! signal and deadline of a single request. Contexts form a tree: deriving a
//! child never extends the parent's deadline, and cancelling a parent cancels
//! every child.

use std::{fmt, time::Duration};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Why a context is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context (or one of its parents) was cancelled explicitly
    Canceled,
    /// The deadline passed
    DeadlineExceeded,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Canceled => write!(f, "context canceled"),
            ContextError::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// Cancellation signal plus optional deadline for one unit of work
#[derive(Clone, Debug)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Create a root context with no deadline
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a child whose deadline is `now + timeout`, capped by the parent's
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child sharing the parent's deadline
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Guard that cancels the context when dropped
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// Reports why the context is done, or `None` while it is still live
    pub fn error(&self) -> Option<ContextError> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(ContextError::DeadlineExceeded);
        }
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        None
    }

    pub fn is_done(&self) -> bool {
        self.error().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}
