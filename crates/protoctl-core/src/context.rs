//! Request-scoped cancellation.
//!
//! Every controller operation takes a [`Context`]. Long-running steps (bucket
//! walks, module resolution, compilation) call [`Context::check`] and return
//! [`Error::Cancelled`] promptly once the context, or any of its ancestors,
//! has been cancelled.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    parent: Option<Arc<Inner>>,
}

impl Inner {
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }
}

/// A cancellation token propagated through every call.
///
/// Cloning shares the same token. [`Context::child`] creates a token that is
/// cancelled when either itself or its parent is cancelled, without
/// cancelling the parent.
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// A root context that is never cancelled unless [`Context::cancel`] is called
    pub fn background() -> Self {
        Self::default()
    }

    /// Creates a child context
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.inner)),
            }),
        }
    }

    /// Cancels this context and all of its children
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once this context or an ancestor was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Returns [`Error::Cancelled`] if the context was cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_observes_parent() {
        let parent = Context::background();
        let child = parent.child();
        assert!(child.check().is_ok());
        parent.cancel();
        assert!(matches!(child.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
