//! Per-root archival mechanics.

use crate::error::ArchiveError;
use chrono::Utc;
use keel::codec;
use keel::event::{Event, EventId};
use keel::lock::{machine_lock_key, DEFAULT_LOCK_WAIT};
use keel::{ArchiveRow, LockError, LockService, MachineStore, RuntimeConfig};
use std::sync::Arc;

/// What archiving one root produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveOutcome {
    /// The archived root.
    pub root_event_id: EventId,
    /// How many events the blob holds.
    pub event_count: u64,
    /// Canonical encoding size before compression.
    pub original_size: u64,
    /// Stored blob size.
    pub compressed_size: u64,
    /// Whether the blob is deflate-framed (false when it fell under
    /// the threshold or compression is disabled).
    pub compressed: bool,
}

/// Moves cold timelines into the archive table and back.
pub struct Archiver {
    store: Arc<dyn MachineStore>,
    locks: Arc<dyn LockService>,
    config: RuntimeConfig,
    lock_wait: std::time::Duration,
}

impl Archiver {
    /// An archiver over the given store and lock service.
    pub fn new(
        store: Arc<dyn MachineStore>,
        locks: Arc<dyn LockService>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            store,
            locks,
            config,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Override how long to wait for a busy machine before giving up.
    pub fn with_lock_wait(mut self, wait: std::time::Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Archive one timeline: under the instance lock, load the
    /// ordered events, encode them (deflate above the configured
    /// threshold, raw below it), insert the archive row and delete
    /// the events in one store transaction.
    pub async fn archive_root(&self, root: &EventId) -> Result<ArchiveOutcome, ArchiveError> {
        let key = machine_lock_key(root);
        match self.locks.acquire(&key, self.lock_wait).await {
            Ok(()) => {}
            Err(LockError::Contended { .. }) => {
                return Err(ArchiveError::MachineBusy(root.to_string()));
            }
            Err(other) => return Err(ArchiveError::Lock(other)),
        }

        let outcome = self.archive_locked(root).await;
        if let Err(error) = self.locks.release(&key).await {
            tracing::warn!(key = %key, %error, "failed to release machine lock after archival");
        }
        outcome
    }

    async fn archive_locked(&self, root: &EventId) -> Result<ArchiveOutcome, ArchiveError> {
        let events = self.store.events_for_root(root).await?;
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Err(ArchiveError::NothingToArchive(root.to_string()));
        };

        let raw = codec::canonical_events(&events)?;
        let blob = codec::encode_bytes(&raw, &self.config.compression)?;
        let compressed = codec::is_compressed(&blob);
        let outcome = ArchiveOutcome {
            root_event_id: root.clone(),
            event_count: events.len() as u64,
            original_size: raw.len() as u64,
            compressed_size: blob.len() as u64,
            compressed,
        };

        let row = ArchiveRow {
            root_event_id: root.clone(),
            machine_id: first.machine_id.clone(),
            event_count: outcome.event_count,
            first_event_at: first.created_at,
            last_event_at: last.created_at,
            archived_at: Utc::now(),
            last_restored_at: None,
            restore_count: 0,
            compression_level: if compressed {
                self.config.compression.level
            } else {
                0
            },
            original_size: outcome.original_size,
            compressed_size: outcome.compressed_size,
            payload: blob,
        };
        self.store.move_to_archive(row).await?;
        tracing::debug!(
            root = %root,
            events = outcome.event_count,
            original = outcome.original_size,
            stored = outcome.compressed_size,
            "timeline archived"
        );
        Ok(outcome)
    }

    /// Restore a timeline into the event log and delete its archive
    /// row, in one store transaction. The rows are re-inserted
    /// byte-identically, bypassing the append path so nothing is
    /// double-recorded.
    pub async fn restore_and_delete(&self, root: &EventId) -> Result<Vec<Event>, ArchiveError> {
        let Some(row) = self.store.archive_row(root).await? else {
            return Err(ArchiveError::NotArchived(root.to_string()));
        };
        let events = codec::decode_events(&row.payload)?;
        self.store.restore_from_archive(root, &events).await?;
        tracing::debug!(root = %root, events = events.len(), "timeline restored and archive dropped");
        Ok(events)
    }

    /// Decode a timeline without touching the event log, keeping the
    /// archive row. Bumps `restore_count` and `last_restored_at`.
    pub async fn restore_events(&self, root: &EventId) -> Result<Vec<Event>, ArchiveError> {
        let Some(row) = self.store.archive_row(root).await? else {
            return Err(ArchiveError::NotArchived(root.to_string()));
        };
        let events = codec::decode_events(&row.payload)?;
        self.store.record_restore(root, Utc::now()).await?;
        Ok(events)
    }
}
