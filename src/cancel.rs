//! A flag for aborting in-flight archive creation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::result::*;

/// Shared cancellation signal.
///
/// Clones share state: cancel any one of them and every holder sees it.
/// The archiver checks it between buffer-sized reads, so cancellation
/// takes effect within one read of being requested.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns [`ArchiveError::Cancelled`] if the flag has been set.
    ///
    /// [`ArchiveError::Cancelled`]: ../result/enum.ArchiveError.html#variant.Cancelled
    pub fn check(&self) -> ArchiveResult<()> {
        if self.is_cancelled() {
            Err(ArchiveError::Cancelled)
        } else {
            Ok(())
        }
    }
}
