//! Cooperative cancellation scopes.
//!
//! A [`CancelToken`] wraps a `tokio_util` cancellation token. Tokens form a
//! tree: a child is cancelled when it or any ancestor is, while cancelling a
//! child leaves the parent untouched.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cloneable cancellation handle
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    /// Create a root token
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope that is also cancelled whenever `self` is
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }

    /// Signal cancellation to every clone and descendant of this scope
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once this scope or an ancestor is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancelled()
    }
}
