//! The MachineStore protocol — how timelines persist.

use crate::archive::ArchiveRow;
use crate::error::StoreError;
use crate::event::{Event, EventId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A root with no recent activity, as returned by eligibility scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleRoot {
    /// Root event id of the idle timeline.
    pub root_event_id: EventId,
    /// Machine definition of the timeline.
    pub machine_id: String,
    /// `created_at` of the most recent event.
    pub last_activity_at: DateTime<Utc>,
}

/// Contract for the host persistence store.
///
/// The host exposes two tables — the append-only event log and the
/// archive — with standard transaction semantics. The runtime never
/// implements this against a real database; `statecraft-store-memory`
/// provides the in-process stand-in used by tests and prototypes.
///
/// Implementations must enforce: unique `id`; unique `sequence_number`
/// within a `root_event_id`; and atomicity of [`append`],
/// [`move_to_archive`] and [`restore_from_archive`].
///
/// [`append`]: MachineStore::append
/// [`move_to_archive`]: MachineStore::move_to_archive
/// [`restore_from_archive`]: MachineStore::restore_from_archive
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Append a batch of events atomically. Either every row is
    /// inserted or none is.
    async fn append(&self, events: &[Event]) -> Result<(), StoreError>;

    /// Append events one by one, without a surrounding transaction.
    /// Insertion stops at the first row the store rejects; rows
    /// already inserted are kept. Returns how many rows were
    /// inserted — a short count reports where the batch stopped.
    /// `Err` is reserved for failures where nothing can be said
    /// about the batch at all.
    async fn append_each(&self, events: &[Event]) -> Result<usize, StoreError>;

    /// All events for a root, ordered by `sequence_number`.
    async fn events_for_root(&self, root: &EventId) -> Result<Vec<Event>, StoreError>;

    /// `created_at` of the most recent event for a root. None if the
    /// root has no events (archived or unknown).
    async fn latest_activity(&self, root: &EventId) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Roots whose newest event predates `idle_since` and which have no
    /// archive row, up to `limit`. Hosts should implement this with a
    /// "recent activity does not exist" predicate over the indexed
    /// `created_at` column, not a GROUP BY over the full table.
    async fn idle_roots(
        &self,
        idle_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IdleRoot>, StoreError>;

    /// When the root was last restored from the archive, if ever.
    ///
    /// This survives archive-row deletion: a host store keeps it as a
    /// retained column or ledger so the restore cooldown still applies
    /// after a restore-and-delete.
    async fn last_restored_at(&self, root: &EventId)
        -> Result<Option<DateTime<Utc>>, StoreError>;

    /// The archive row for a root, if one exists.
    async fn archive_row(&self, root: &EventId) -> Result<Option<ArchiveRow>, StoreError>;

    /// Insert the archive row and delete the root's events, inside one
    /// transaction.
    async fn move_to_archive(&self, row: ArchiveRow) -> Result<(), StoreError>;

    /// Re-insert the decoded events byte-identically (bypassing the
    /// append path so nothing is re-recorded) and delete the archive
    /// row, inside one transaction.
    async fn restore_from_archive(
        &self,
        root: &EventId,
        events: &[Event],
    ) -> Result<(), StoreError>;

    /// Bump `restore_count` and `last_restored_at` on the archive row.
    async fn record_restore(&self, root: &EventId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete archive rows whose `archived_at` predates `older_than`.
    /// Returns how many rows were deleted.
    async fn prune_archives(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}
