#![deny(missing_docs)]
//! In-memory implementations of keel's collaborator protocols.
//!
//! [`MemoryStore`] holds both tables (event log + archive) behind one
//! `RwLock`, which makes the cross-table operations trivially atomic.
//! [`MemoryLocks`] is a process-local lock service with bounded
//! waits. [`MemoryJobs`] records dispatches for assertions instead of
//! running them.
//!
//! Suitable for testing, prototyping, and single-process use; real
//! deployments implement the protocols against their own store,
//! locks, and job runner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel::event::{Event, EventId};
use keel::store::IdleRoot;
use keel::{ArchiveRow, Job, JobError, JobRunner, LockError, LockService, MachineStore, StoreError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

#[derive(Default)]
struct Tables {
    // root id → events ordered by sequence number
    events: BTreeMap<String, Vec<Event>>,
    event_ids: HashSet<String>,
    archives: HashMap<String, ArchiveRow>,
    // survives archive deletion, like a retained column would
    restores: HashMap<String, DateTime<Utc>>,
}

impl Tables {
    fn check_insertable(&self, event: &Event) -> Result<(), StoreError> {
        if self.event_ids.contains(event.id.as_str()) {
            return Err(StoreError::DuplicateEvent(event.id.to_string()));
        }
        let root = event.root_event_id.as_str();
        if let Some(existing) = self.events.get(root) {
            if existing
                .iter()
                .any(|e| e.sequence_number == event.sequence_number)
            {
                return Err(StoreError::SequenceConflict {
                    root: root.to_owned(),
                    sequence_number: event.sequence_number,
                });
            }
        }
        Ok(())
    }

    fn insert(&mut self, event: Event) {
        self.event_ids.insert(event.id.to_string());
        let row = self.events.entry(event.root_event_id.to_string()).or_default();
        row.push(event);
        row.sort_by_key(|e| e.sequence_number);
    }
}

/// In-memory machine store: both tables behind a `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// A new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of event rows across all roots.
    pub async fn event_count(&self) -> usize {
        let tables = self.tables.read().await;
        tables.events.values().map(Vec::len).sum()
    }

    /// Number of archive rows.
    pub async fn archive_count(&self) -> usize {
        self.tables.read().await.archives.len()
    }
}

#[async_trait]
impl MachineStore for MemoryStore {
    async fn append(&self, events: &[Event]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for event in events {
            tables.check_insertable(event)?;
        }
        for event in events {
            tables.insert(event.clone());
        }
        Ok(())
    }

    async fn append_each(&self, events: &[Event]) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let mut appended = 0;
        for event in events {
            // The first rejected row stops the batch; earlier rows
            // stay inserted and the short count reports the cut.
            if tables.check_insertable(event).is_err() {
                break;
            }
            tables.insert(event.clone());
            appended += 1;
        }
        Ok(appended)
    }

    async fn events_for_root(&self, root: &EventId) -> Result<Vec<Event>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.events.get(root.as_str()).cloned().unwrap_or_default())
    }

    async fn latest_activity(
        &self,
        root: &EventId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .get(root.as_str())
            .and_then(|events| events.iter().map(|e| e.created_at).max()))
    }

    async fn idle_roots(
        &self,
        idle_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IdleRoot>, StoreError> {
        let tables = self.tables.read().await;
        let mut idle: Vec<IdleRoot> = tables
            .events
            .iter()
            .filter(|(root, _)| !tables.archives.contains_key(*root))
            .filter_map(|(root, events)| {
                let last_activity_at = events.iter().map(|e| e.created_at).max()?;
                if last_activity_at >= idle_since {
                    return None;
                }
                Some(IdleRoot {
                    root_event_id: EventId::new(root.clone()),
                    machine_id: events.first()?.machine_id.clone(),
                    last_activity_at,
                })
            })
            .collect();
        idle.sort_by_key(|r| r.last_activity_at);
        idle.truncate(limit);
        Ok(idle)
    }

    async fn last_restored_at(
        &self,
        root: &EventId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.restores.get(root.as_str()).copied())
    }

    async fn archive_row(&self, root: &EventId) -> Result<Option<ArchiveRow>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.archives.get(root.as_str()).cloned())
    }

    async fn move_to_archive(&self, row: ArchiveRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let root = row.root_event_id.to_string();
        if tables.archives.contains_key(&root) {
            return Err(StoreError::AlreadyArchived(root));
        }
        if let Some(events) = tables.events.remove(&root) {
            for event in &events {
                tables.event_ids.remove(event.id.as_str());
            }
        }
        tables.archives.insert(root, row);
        Ok(())
    }

    async fn restore_from_archive(
        &self,
        root: &EventId,
        events: &[Event],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.archives.remove(root.as_str()).is_none() {
            return Err(StoreError::ArchiveNotFound(root.to_string()));
        }
        // Bypasses the append checks: the rows are re-inserted
        // byte-identically, ids and sequence numbers included.
        for event in events {
            tables.insert(event.clone());
        }
        tables.restores.insert(root.to_string(), Utc::now());
        Ok(())
    }

    async fn record_restore(&self, root: &EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let Some(row) = tables.archives.get_mut(root.as_str()) else {
            return Err(StoreError::ArchiveNotFound(root.to_string()));
        };
        row.restore_count += 1;
        row.last_restored_at = Some(at);
        tables.restores.insert(root.to_string(), at);
        Ok(())
    }

    async fn prune_archives(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.archives.len();
        tables.archives.retain(|_, row| row.archived_at >= older_than);
        Ok((before - tables.archives.len()) as u64)
    }
}

/// Process-local lock service: a held-key set plus a notifier.
#[derive(Default)]
pub struct MemoryLocks {
    held: Mutex<HashSet<String>>,
    released: Notify,
}

impl MemoryLocks {
    /// A new lock service with nothing held.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for MemoryLocks {
    async fn acquire(&self, key: &str, wait: Duration) -> Result<(), LockError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut held = self.held.lock().await;
                if !held.contains(key) {
                    held.insert(key.to_owned());
                    return Ok(());
                }
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(LockError::Contended {
                    key: key.to_owned(),
                    waited_ms: wait.as_millis() as u64,
                });
            };
            // A release landing between the check above and this wait
            // is missed; the timeout bounds the extra delay.
            let _ = tokio::time::timeout(remaining, self.released.notified()).await;
        }
    }

    async fn release(&self, key: &str) -> Result<(), LockError> {
        let mut held = self.held.lock().await;
        if !held.remove(key) {
            return Err(LockError::NotHeld(key.to_owned()));
        }
        self.released.notify_waiters();
        Ok(())
    }
}

/// Recording job runner: dispatches are captured, deduplicated by
/// unique key, and never executed.
#[derive(Default)]
pub struct MemoryJobs {
    state: Mutex<JobLog>,
}

#[derive(Default)]
struct JobLog {
    jobs: Vec<Job>,
    keys: HashSet<String>,
}

impl MemoryJobs {
    /// A new, empty runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything dispatched so far (dedup already applied).
    pub async fn dispatched(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }

    /// Take the captured jobs, freeing their unique keys.
    pub async fn drain(&self) -> Vec<Job> {
        let mut state = self.state.lock().await;
        state.keys.clear();
        std::mem::take(&mut state.jobs)
    }

    /// Mark one job finished so its unique key can be reused.
    pub async fn complete(&self, unique_key: &str) {
        self.state.lock().await.keys.remove(unique_key);
    }
}

#[async_trait]
impl JobRunner for MemoryJobs {
    async fn dispatch(&self, job: Job) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        if !state.keys.insert(job.unique_key.clone()) {
            // Same unique key already queued: silently dropped.
            return Ok(());
        }
        state.jobs.push(job);
        Ok(())
    }
}
