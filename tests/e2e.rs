//! End-to-end flows across the whole workspace: live machines over
//! the in-memory store, then archival and transparent restore of the
//! same timelines.

use chrono::{Duration as ChronoDuration, Utc};
use keel::event::{ContextSnapshot, Event, EventId, EventSource};
use keel::{LockService, MachineStore, RuntimeConfig};
use serde_json::json;
use statecraft::prelude::*;
use statecraft::compile;
use statecraft_archive::{Archiver, Sweeper};
use statecraft_store_memory::{MemoryJobs, MemoryLocks, MemoryStore};
use std::sync::Arc;

fn order_config() -> serde_json::Value {
    json!({
        "id": "order",
        "initial": "open",
        "context": { "items": 0 },
        "states": {
            "open": {
                "on": {
                    "ADD": { "actions": "add_item" },
                    "PLACE": [
                        { "guards": "has_items", "target": "placed" },
                    ],
                },
            },
            "placed": {
                "entry": "confirm",
                "on": { "SHIP": "shipped" },
            },
            "shipped": { "type": "final" },
        },
    })
}

fn order_behaviors() -> Behaviors {
    Behaviors::new()
        .action("add_item", |context, _exec, _queue| {
            let next = context.get_i64("items").unwrap_or_default() + 1;
            context.set("items", json!(next)).map_err(|e| e.to_string())
        })
        .action("confirm", |context, _exec, _queue| {
            context
                .set("confirmed", json!(true))
                .map_err(|e| e.to_string())
        })
        .guard("has_items", |context, _exec| {
            Ok(context.get_i64("items").unwrap_or_default() > 0)
        })
}

#[tokio::test]
async fn order_lifecycle_with_replay() {
    let store = Arc::new(MemoryStore::new());
    let locks = Arc::new(MemoryLocks::new());
    let definition = Arc::new(compile(&order_config(), order_behaviors()).unwrap());

    let mut order = Machine::start(
        Arc::clone(&definition),
        Arc::clone(&store) as Arc<dyn MachineStore>,
        Arc::clone(&locks) as Arc<dyn LockService>,
    )
    .await
    .unwrap();

    // Guard declines an empty order.
    order.send("PLACE").await.unwrap();
    assert_eq!(order.value(), ["order.open"]);

    order.send("ADD").await.unwrap();
    order.send("ADD").await.unwrap();
    order.send("PLACE").await.unwrap();
    assert_eq!(order.value(), ["order.placed"]);
    assert_eq!(order.context().get("confirmed"), Some(&json!(true)));

    order.send("SHIP").await.unwrap();
    assert_eq!(order.value(), ["order.shipped"]);
    assert!(order
        .state()
        .history
        .iter()
        .any(|e| e.event_type == "order.finish"));

    // A fresh actor replays the whole thing from the root id.
    let replayed = Machine::load(
        definition,
        Arc::clone(&store) as Arc<dyn MachineStore>,
        Arc::clone(&locks) as Arc<dyn LockService>,
        order.root_event_id().clone(),
    )
    .await
    .unwrap();
    assert_eq!(replayed.value(), order.value());
    assert_eq!(replayed.context().snapshot(), order.context().snapshot());
    assert_eq!(replayed.context().get_i64("items"), Some(2));
}

fn aged_timeline(root: &EventId, count: u64, days_ago: i64) -> Vec<Event> {
    (1..=count)
        .map(|sequence| Event {
            id: if sequence == 1 {
                root.clone()
            } else {
                EventId::generate()
            },
            sequence_number: sequence,
            created_at: Utc::now() - ChronoDuration::days(days_ago),
            machine_id: "order".to_owned(),
            machine_value: vec!["order.open".to_owned()],
            root_event_id: root.clone(),
            source: EventSource::External,
            event_type: "ADD".to_owned(),
            payload: Some(json!({"sku": "A-113", "qty": sequence})),
            context: Some(if sequence == 1 {
                ContextSnapshot::Full {
                    entries: vec![keel::event::ContextEntry::new("items", json!(0))],
                }
            } else {
                ContextSnapshot::Delta {
                    set: vec![keel::event::ContextEntry::new(
                        "items",
                        json!(sequence - 1),
                    )],
                    unset: vec![],
                }
            }),
            meta: None,
            version: 1,
        })
        .collect()
}

#[tokio::test]
async fn cold_timelines_archive_and_restore_transparently() {
    let store = Arc::new(MemoryStore::new());
    let locks = Arc::new(MemoryLocks::new());
    let jobs = Arc::new(MemoryJobs::new());
    let config = RuntimeConfig::default();

    // A timeline that went quiet 35 days ago.
    let root = EventId::generate();
    let events = aged_timeline(&root, 3, 35);
    store.append(&events).await.unwrap();

    let sweeper = Sweeper::new(
        Arc::clone(&store) as Arc<dyn MachineStore>,
        Arc::clone(&jobs) as Arc<dyn keel::JobRunner>,
        config.clone(),
    );
    let archiver = Archiver::new(
        Arc::clone(&store) as Arc<dyn MachineStore>,
        Arc::clone(&locks) as Arc<dyn LockService>,
        config,
    );

    // Sweep selects it, the job archives it.
    let dispatched = sweeper.sweep().await.unwrap();
    assert_eq!(dispatched, vec![root.clone()]);
    for job in jobs.drain().await {
        sweeper.run_job(&archiver, &job).await.unwrap();
    }
    assert!(store.events_for_root(&root).await.unwrap().is_empty());
    let row = store.archive_row(&root).await.unwrap().unwrap();
    assert_eq!(row.event_count, 3);

    // Loading the machine transparently restores the timeline.
    let definition = Arc::new(compile(&order_config(), order_behaviors()).unwrap());
    let machine = Machine::load(
        definition,
        Arc::clone(&store) as Arc<dyn MachineStore>,
        Arc::clone(&locks) as Arc<dyn LockService>,
        root.clone(),
    )
    .await
    .unwrap();
    assert_eq!(machine.value(), ["order.open"]);
    assert_eq!(machine.context().get_i64("items"), Some(2));

    // The rows are back, byte-identical, and the archive is gone.
    assert_eq!(store.events_for_root(&root).await.unwrap(), events);
    assert!(store.archive_row(&root).await.unwrap().is_none());

    // Fresh restore stamps a cooldown, so the next sweep skips it.
    assert!(sweeper.sweep().await.unwrap().is_empty());
}
