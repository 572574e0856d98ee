use keel::event::{is_reserved_type, ContextEntry, ContextSnapshot, SendEvent};
use keel::{Job, JobKind, RetryPolicy};
use serde_json::json;
use std::time::Duration;

// --- Context snapshots ---

#[test]
fn full_snapshot_replaces_contents() {
    let mut entries = vec![ContextEntry::new("stale", json!(1))];
    let snapshot = ContextSnapshot::Full {
        entries: vec![
            ContextEntry::new("a", json!(1)),
            ContextEntry::new("b", json!("two")),
        ],
    };
    snapshot.fold_into(&mut entries);
    assert_eq!(
        entries,
        vec![
            ContextEntry::new("a", json!(1)),
            ContextEntry::new("b", json!("two")),
        ]
    );
}

#[test]
fn delta_upserts_in_order_and_removes() {
    let mut entries = vec![
        ContextEntry::new("a", json!(1)),
        ContextEntry::new("b", json!(2)),
    ];
    let snapshot = ContextSnapshot::Delta {
        set: vec![
            ContextEntry::new("b", json!(20)),
            ContextEntry::new("c", json!(3)),
        ],
        unset: vec!["a".to_owned()],
    };
    snapshot.fold_into(&mut entries);
    assert_eq!(
        entries,
        vec![
            ContextEntry::new("b", json!(20)),
            ContextEntry::new("c", json!(3)),
        ]
    );
}

#[test]
fn folding_a_timeline_reproduces_final_context() {
    let timeline = [
        ContextSnapshot::Full {
            entries: vec![ContextEntry::new("count", json!(0))],
        },
        ContextSnapshot::Delta {
            set: vec![ContextEntry::new("count", json!(1))],
            unset: vec![],
        },
        ContextSnapshot::Delta {
            set: vec![ContextEntry::new("name", json!("n"))],
            unset: vec![],
        },
        ContextSnapshot::Delta {
            set: vec![],
            unset: vec!["name".to_owned()],
        },
    ];
    let mut entries = Vec::new();
    for snapshot in &timeline {
        snapshot.fold_into(&mut entries);
    }
    assert_eq!(entries, vec![ContextEntry::new("count", json!(1))]);
}

// --- Wire shape ---

#[test]
fn send_event_defaults() {
    let event: SendEvent = serde_json::from_value(json!({"type": "NEXT"})).unwrap();
    assert_eq!(event.event_type, "NEXT");
    assert_eq!(event.version, 1);
    assert!(event.is_transactional);
    assert!(event.payload.is_none());
}

#[test]
fn send_event_round_trips_type_field() {
    let event = SendEvent::new("CHECK").with_payload(json!({"n": 1}));
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "CHECK");
    assert_eq!(value["payload"]["n"], 1);
}

#[test]
fn reserved_types_are_detected() {
    assert!(is_reserved_type("@always", "traffic"));
    assert!(is_reserved_type("@done", "traffic"));
    assert!(is_reserved_type("machine.start", "traffic"));
    assert!(is_reserved_type("traffic.state.green.enter", "traffic"));
    assert!(!is_reserved_type("NEXT", "traffic"));
    assert!(!is_reserved_type("lights.NEXT", "traffic"));
}

// --- Jobs ---

#[test]
fn archive_job_key_dedupes_per_root() {
    let job = Job::archive_root("01HQZ".into(), None);
    assert_eq!(job.unique_key, "archive-01HQZ");
    assert!(matches!(job.kind, JobKind::ArchiveRoot { .. }));
    assert_eq!(job.timeout, Duration::from_secs(300));
}

#[test]
fn sweep_job_uses_batch_timeout_and_queue() {
    let job = Job::sweep(Some("cold".to_owned()));
    assert_eq!(job.queue.as_deref(), Some("cold"));
    assert_eq!(job.timeout, Duration::from_secs(1800));
}

#[test]
fn retry_backoff_doubles_from_seed() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.attempts, 3);
    assert_eq!(policy.backoff(1), Duration::from_secs(60));
    assert_eq!(policy.backoff(2), Duration::from_secs(120));
    assert_eq!(policy.backoff(3), Duration::from_secs(240));
}
