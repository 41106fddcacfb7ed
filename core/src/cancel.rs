//! Cooperative cancellation token, checked at every suspension point of a
//! long-running or paginated operation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// A cheap, cloneable handle that can be flagged as cancelled from any task.
///
/// Unlike a full `tokio_util::sync::CancellationToken`, this only needs to
/// support polling (`is_cancelled`) since every consumer in this crate checks
/// it between awaits rather than selecting on it.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, non-cancelled token.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag this token (and every clone/child of it) as cancelled.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether this token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// A clone that shares the same cancellation flag.
    ///
    /// Kept distinct from plain `clone()` so call sites document intent:
    /// a "child" is handed to a sub-operation that should observe the
    /// parent's cancellation but never itself cancel the parent.
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// Return `Err(Error::Cancelled)` if this token has been cancelled.
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
    fn child_observes_parent_cancellation() {
        let parent = CancellationToken::new();
        let child = parent.child();
        assert!(child.check().is_ok());
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(Error::Cancelled)));
    }
}
