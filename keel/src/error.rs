//! Error types for each protocol.

use thiserror::Error;

/// Persistence store errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// An event id was inserted twice.
    #[error("duplicate event id: {0}")]
    DuplicateEvent(String),

    /// A sequence number was reused within a root.
    #[error("sequence conflict on root {root}: {sequence_number} already exists")]
    SequenceConflict {
        /// Root whose timeline clashed.
        root: String,
        /// The colliding sequence number.
        sequence_number: u64,
    },

    /// No archive row for the requested root.
    #[error("no archive for root: {0}")]
    ArchiveNotFound(String),

    /// An archive row already exists for the root.
    #[error("root already archived: {0}")]
    AlreadyArchived(String),

    /// The underlying store rejected a transaction.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// A non-transactional batch stopped early: the first rows are
    /// durable, the rest were never inserted.
    #[error("partial append: {appended} of {total} rows inserted")]
    PartialAppend {
        /// Rows inserted before the batch stopped.
        appended: usize,
        /// Rows in the batch.
        total: usize,
    },

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Lock service errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was still held when the wait elapsed.
    #[error("lock contended: {key} (waited {waited_ms}ms)")]
    Contended {
        /// The contended key.
        key: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// Released a key that was not held.
    #[error("lock not held: {0}")]
    NotHeld(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Job runner errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum JobError {
    /// The runner refused the dispatch.
    #[error("dispatch rejected: {0}")]
    Rejected(String),

    /// The named queue does not exist.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Compression codec errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization to or from JSON failed.
    #[error("json error: {0}")]
    Json(String),

    /// The deflate stream could not be written or read.
    #[error("deflate error: {0}")]
    Deflate(String),

    /// Expected the compression framing but the magic header is absent.
    #[error("missing compression header")]
    MissingHeader,
}

/// Configuration errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A key holds a value that cannot be parsed or is out of range.
    #[error("invalid config value for {key}: {value:?}")]
    Invalid {
        /// The offending key.
        key: String,
        /// The raw value.
        value: String,
    },
}
