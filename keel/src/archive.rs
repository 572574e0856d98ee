//! The archive row — a compressed, cold copy of one timeline.

use crate::event::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One archived timeline, keyed by its root event id.
///
/// The `payload` blob losslessly encodes the entire ordered event
/// sequence (see [`crate::codec`]); restoring it re-inserts the rows
/// byte-identically and deletes this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRow {
    /// Root event id of the archived timeline.
    pub root_event_id: EventId,
    /// Machine definition the timeline belongs to.
    pub machine_id: String,
    /// Number of events in the blob.
    pub event_count: u64,
    /// `created_at` of the first event.
    pub first_event_at: DateTime<Utc>,
    /// `created_at` of the last event.
    pub last_event_at: DateTime<Utc>,
    /// When the timeline was archived.
    pub archived_at: DateTime<Utc>,
    /// When the blob was last decoded via a keep-archive restore.
    pub last_restored_at: Option<DateTime<Utc>>,
    /// How many keep-archive restores have happened.
    pub restore_count: u32,
    /// Deflate level used for the blob, 0–9. Informational when the
    /// blob fell below the compression threshold and stayed raw.
    pub compression_level: u32,
    /// Size of the canonical JSON encoding before compression.
    pub original_size: u64,
    /// Size of the stored blob.
    pub compressed_size: u64,
    /// Codec-framed event sequence.
    pub payload: Vec<u8>,
}
