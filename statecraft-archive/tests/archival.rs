use chrono::{Duration as ChronoDuration, Utc};
use keel::config::ArchivalOverride;
use keel::event::{ContextSnapshot, Event, EventId, EventSource};
use keel::lock::machine_lock_key;
use keel::{JobKind, LockService, MachineStore, RuntimeConfig};
use serde_json::json;
use statecraft_archive::{ArchiveError, Archiver, Sweeper};
use statecraft_store_memory::{MemoryJobs, MemoryLocks, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

fn timeline(root: &EventId, machine_id: &str, count: u64, days_ago: i64) -> Vec<Event> {
    (1..=count)
        .map(|sequence| Event {
            id: if sequence == 1 {
                root.clone()
            } else {
                EventId::generate()
            },
            sequence_number: sequence,
            created_at: Utc::now() - ChronoDuration::days(days_ago),
            machine_id: machine_id.to_owned(),
            machine_value: vec![format!("{machine_id}.open")],
            root_event_id: root.clone(),
            source: EventSource::External,
            event_type: "PLACE".to_owned(),
            payload: Some(json!({"note": "some payload that pads the canonical encoding"})),
            context: Some(ContextSnapshot::empty_delta()),
            meta: None,
            version: 1,
        })
        .collect()
}

struct Fixture {
    store: Arc<MemoryStore>,
    locks: Arc<MemoryLocks>,
    jobs: Arc<MemoryJobs>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            locks: Arc::new(MemoryLocks::new()),
            jobs: Arc::new(MemoryJobs::new()),
        }
    }

    fn archiver(&self, config: RuntimeConfig) -> Archiver {
        Archiver::new(
            Arc::clone(&self.store) as Arc<dyn MachineStore>,
            Arc::clone(&self.locks) as Arc<dyn keel::LockService>,
            config,
        )
    }

    fn sweeper(&self, config: RuntimeConfig) -> Sweeper {
        Sweeper::new(
            Arc::clone(&self.store) as Arc<dyn MachineStore>,
            Arc::clone(&self.jobs) as Arc<dyn keel::JobRunner>,
            config,
        )
    }
}

// --- Archive round-trip ---

#[tokio::test]
async fn archive_then_restore_is_byte_identical() {
    let fx = Fixture::new();
    let root = EventId::generate();
    let events = timeline(&root, "orders", 3, 35);
    fx.store.append(&events).await.unwrap();

    let archiver = fx.archiver(RuntimeConfig::default());
    let outcome = archiver.archive_root(&root).await.unwrap();
    assert_eq!(outcome.event_count, 3);
    assert!(outcome.compressed);
    assert!(outcome.compressed_size < outcome.original_size);

    // The event table no longer holds the root; the archive does.
    assert!(fx.store.events_for_root(&root).await.unwrap().is_empty());
    let row = fx.store.archive_row(&root).await.unwrap().unwrap();
    assert_eq!(row.event_count, 3);
    assert_eq!(row.machine_id, "orders");
    assert_eq!(row.restore_count, 0);
    assert!(row.last_restored_at.is_none());

    let restored = archiver.restore_and_delete(&root).await.unwrap();
    assert_eq!(restored, events);
    assert_eq!(fx.store.events_for_root(&root).await.unwrap(), events);
    assert!(fx.store.archive_row(&root).await.unwrap().is_none());
}

#[tokio::test]
async fn small_timelines_stay_uncompressed() {
    let fx = Fixture::new();
    let root = EventId::generate();
    fx.store
        .append(&timeline(&root, "orders", 1, 35))
        .await
        .unwrap();

    let mut config = RuntimeConfig::default();
    config.compression.threshold = 1_000_000;
    let archiver = fx.archiver(config);

    let outcome = archiver.archive_root(&root).await.unwrap();
    assert!(!outcome.compressed);
    assert_eq!(outcome.compressed_size, outcome.original_size);
    let row = fx.store.archive_row(&root).await.unwrap().unwrap();
    assert_eq!(row.compression_level, 0);

    let restored = archiver.restore_and_delete(&root).await.unwrap();
    assert_eq!(restored.len(), 1);
}

#[tokio::test]
async fn restore_events_keeps_archive_and_counts() {
    let fx = Fixture::new();
    let root = EventId::generate();
    let events = timeline(&root, "orders", 2, 35);
    fx.store.append(&events).await.unwrap();

    let archiver = fx.archiver(RuntimeConfig::default());
    archiver.archive_root(&root).await.unwrap();

    let decoded = archiver.restore_events(&root).await.unwrap();
    assert_eq!(decoded, events);
    // Events stay archived; only the counters moved.
    assert!(fx.store.events_for_root(&root).await.unwrap().is_empty());
    let row = fx.store.archive_row(&root).await.unwrap().unwrap();
    assert_eq!(row.restore_count, 1);
    assert!(row.last_restored_at.is_some());
}

// --- Failure modes ---

#[tokio::test]
async fn archiving_an_unknown_root_is_an_error() {
    let fx = Fixture::new();
    let archiver = fx.archiver(RuntimeConfig::default());
    let err = archiver.archive_root(&EventId::generate()).await.unwrap_err();
    assert!(matches!(err, ArchiveError::NothingToArchive(_)));
}

#[tokio::test]
async fn restoring_an_unarchived_root_is_an_error() {
    let fx = Fixture::new();
    let archiver = fx.archiver(RuntimeConfig::default());
    let err = archiver
        .restore_and_delete(&EventId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::NotArchived(_)));
}

#[tokio::test]
async fn running_machine_excludes_archival() {
    let fx = Fixture::new();
    let root = EventId::generate();
    fx.store
        .append(&timeline(&root, "orders", 1, 35))
        .await
        .unwrap();
    // Simulate a macro-step in flight.
    fx.locks
        .acquire(&machine_lock_key(&root), Duration::from_millis(10))
        .await
        .unwrap();

    let archiver = fx
        .archiver(RuntimeConfig::default())
        .with_lock_wait(Duration::from_millis(50));
    let err = archiver.archive_root(&root).await.unwrap_err();
    assert!(matches!(err, ArchiveError::MachineBusy(_)));
    assert_eq!(fx.store.events_for_root(&root).await.unwrap().len(), 1);
}

// --- Sweeping ---

#[tokio::test]
async fn sweep_dispatches_one_deduplicated_job_per_cold_root() {
    let fx = Fixture::new();
    let cold = EventId::generate();
    let hot = EventId::generate();
    fx.store
        .append(&timeline(&cold, "orders", 2, 40))
        .await
        .unwrap();
    fx.store
        .append(&timeline(&hot, "orders", 2, 1))
        .await
        .unwrap();

    let sweeper = fx.sweeper(RuntimeConfig::default());
    let dispatched = sweeper.sweep().await.unwrap();
    assert_eq!(dispatched, vec![cold.clone()]);

    // A second sweep re-selects the root but the job dedups away.
    sweeper.sweep().await.unwrap();
    let jobs = fx.jobs.dispatched().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].unique_key, format!("archive-{cold}"));
    assert!(matches!(jobs[0].kind, JobKind::ArchiveRoot { .. }));
}

#[tokio::test]
async fn sweep_respects_disabled_switch() {
    let fx = Fixture::new();
    let cold = EventId::generate();
    fx.store
        .append(&timeline(&cold, "orders", 1, 40))
        .await
        .unwrap();

    let mut config = RuntimeConfig::default();
    config.archival.enabled = false;
    let sweeper = fx.sweeper(config);
    assert!(sweeper.sweep().await.unwrap().is_empty());
    assert!(fx.jobs.dispatched().await.is_empty());
}

#[tokio::test]
async fn sweep_honors_restore_cooldown() {
    let fx = Fixture::new();
    let root = EventId::generate();
    let events = timeline(&root, "orders", 2, 40);
    fx.store.append(&events).await.unwrap();

    let archiver = fx.archiver(RuntimeConfig::default());
    archiver.archive_root(&root).await.unwrap();
    // Restoring brings the events back and stamps the restore time.
    archiver.restore_and_delete(&root).await.unwrap();

    let sweeper = fx.sweeper(RuntimeConfig::default());
    assert!(sweeper.sweep().await.unwrap().is_empty());
}

#[tokio::test]
async fn sweep_applies_machine_overrides() {
    let fx = Fixture::new();
    let orders = EventId::generate();
    let payments = EventId::generate();
    fx.store
        .append(&timeline(&orders, "orders", 1, 10))
        .await
        .unwrap();
    fx.store
        .append(&timeline(&payments, "payments", 1, 10))
        .await
        .unwrap();

    let mut config = RuntimeConfig::default();
    config.archival.machine_overrides.insert(
        "orders".to_owned(),
        ArchivalOverride {
            days_inactive: Some(7),
            restore_cooldown_hours: None,
            archive_retention_days: None,
        },
    );
    let sweeper = fx.sweeper(config);

    // Ten idle days: past the orders override, inside the global 30.
    let dispatched = sweeper.sweep().await.unwrap();
    assert_eq!(dispatched, vec![orders]);
}

#[tokio::test]
async fn sweep_caps_at_dispatch_limit() {
    let fx = Fixture::new();
    for _ in 0..5 {
        let root = EventId::generate();
        fx.store
            .append(&timeline(&root, "orders", 1, 40))
            .await
            .unwrap();
    }

    let mut config = RuntimeConfig::default();
    config.archival.dispatch_limit = 2;
    let sweeper = fx.sweeper(config);
    assert_eq!(sweeper.sweep().await.unwrap().len(), 2);
}

#[tokio::test]
async fn run_job_archives_dispatched_roots() {
    let fx = Fixture::new();
    let cold = EventId::generate();
    fx.store
        .append(&timeline(&cold, "orders", 3, 40))
        .await
        .unwrap();

    let config = RuntimeConfig::default();
    let sweeper = fx.sweeper(config.clone());
    let archiver = fx.archiver(config);
    sweeper.sweep().await.unwrap();

    for job in fx.jobs.drain().await {
        sweeper.run_job(&archiver, &job).await.unwrap();
    }
    assert!(fx.store.events_for_root(&cold).await.unwrap().is_empty());
    assert_eq!(fx.store.archive_count().await, 1);
}

// --- Retention ---

#[tokio::test]
async fn prune_respects_retention_window() {
    let fx = Fixture::new();
    let root = EventId::generate();
    fx.store
        .append(&timeline(&root, "orders", 1, 400))
        .await
        .unwrap();
    let archiver = fx.archiver(RuntimeConfig::default());
    archiver.archive_root(&root).await.unwrap();

    // Default: no retention window, archives live forever.
    let sweeper = fx.sweeper(RuntimeConfig::default());
    assert_eq!(sweeper.prune().await.unwrap(), 0);

    // Row archived just now, 90-day window: still kept.
    let mut config = RuntimeConfig::default();
    config.archival.archive_retention_days = Some(90);
    let sweeper = fx.sweeper(config);
    assert_eq!(sweeper.prune().await.unwrap(), 0);
    assert_eq!(fx.store.archive_count().await, 1);
}
