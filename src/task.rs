//! Running archive creation as a tokio task.
//!
//! The pipeline itself is blocking I/O, so it runs on tokio's blocking pool.
//! An [`ArchiveTask`] is the handle: await it for the archive name,
//! or cancel it (explicitly, or by dropping it) to abandon the upload
//! and have the staging file removed.
//!
//! [`ArchiveTask`]: struct.ArchiveTask.html

use std::future::Future;
use std::io::{self, Read};
use std::pin::Pin;
use std::task::{Context, Poll};

use log::*;
use tokio::task::JoinHandle;

use crate::archiver::{Archiver, Upload};
use crate::cancel::CancelFlag;
use crate::result::*;

/// A running archive creation. Resolves to the archive's name.
///
/// Dropping the task cancels it. The blocking worker notices at its next
/// read from the upload and cleans up after itself.
pub struct ArchiveTask {
    handle: JoinHandle<ArchiveResult<String>>,
    cancel: CancelFlag,
}

impl ArchiveTask {
    /// Asks the task to stop. Awaiting it afterwards gives
    /// [`ArchiveError::Cancelled`] unless it had already finished.
    ///
    /// [`ArchiveError::Cancelled`]: ../result/enum.ArchiveError.html#variant.Cancelled
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle to this task's cancellation flag,
    /// e.g. to hand to whatever notices the client went away.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

impl Future for ArchiveTask {
    type Output = ArchiveResult<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                error!("Archive worker failed: {}", e);
                Err(ArchiveError::Storage(io::Error::new(
                    io::ErrorKind::Other,
                    format!("Archive worker failed: {e}"),
                )))
            })
        })
    }
}

impl Drop for ArchiveTask {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!("Archive task dropped before finishing; cancelling");
        }
        self.cancel.cancel();
    }
}

impl Archiver {
    /// Starts archiving `upload` on tokio's blocking pool.
    /// Must be called from within a tokio runtime.
    pub fn spawn<R: Read + Send + 'static>(&self, upload: Option<Upload<R>>) -> ArchiveTask {
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let archiver = self.clone();
        let handle = tokio::task::spawn_blocking(move || {
            archiver.create_cancellable(upload, &worker_cancel)
        });
        ArchiveTask { handle, cancel }
    }
}
