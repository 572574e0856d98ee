//! Archival errors.

use keel::{CodecError, LockError, StoreError};
use thiserror::Error;

/// What archival and restore operations can fail with.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The instance lock could not be acquired — a macro-step is in
    /// flight. Retryable.
    #[error("machine busy, cannot archive: {0}")]
    MachineBusy(String),

    /// The root has no events to archive (unknown, or already
    /// archived).
    #[error("nothing to archive for root: {0}")]
    NothingToArchive(String),

    /// No archive row exists for the root.
    #[error("root is not archived: {0}")]
    NotArchived(String),

    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The lock service failed for a reason other than contention.
    #[error("lock error: {0}")]
    Lock(LockError),

    /// Blob encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The job runner refused a dispatch.
    #[error("job error: {0}")]
    Job(#[from] keel::JobError),
}
