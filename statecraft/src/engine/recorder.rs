//! Record accumulation for one macro-step.
//!
//! The engine doesn't build [`keel::Event`] rows directly — ids,
//! sequence numbers and delta encoding belong to the actor. It emits
//! [`EventRecord`]s: the type/source/payload of each row plus a full
//! snapshot of machine value and context at capture time. The actor
//! turns full snapshots into per-row deltas when it persists.

use crate::context::Context;
use crate::definition::MachineDefinition;
use keel::event::{ContextEntry, EventSource};
use serde_json::Value;

/// One not-yet-persisted event row.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Event type string.
    pub event_type: String,
    /// External or internal.
    pub source: EventSource,
    /// Payload, for trigger rows.
    pub payload: Option<Value>,
    /// Metadata, for trigger rows.
    pub meta: Option<Value>,
    /// Event version.
    pub version: u32,
    /// Active leaf ids at capture (backfilled for trigger rows).
    pub machine_value: Vec<String>,
    /// Full context snapshot at capture (backfilled for trigger rows).
    pub context: Vec<ContextEntry>,
}

/// Ordered record sink for one macro-step.
pub struct Recorder<'d> {
    definition: &'d MachineDefinition,
    records: Vec<EventRecord>,
}

impl<'d> Recorder<'d> {
    pub fn new(definition: &'d MachineDefinition) -> Self {
        Self {
            definition,
            records: Vec::new(),
        }
    }

    /// Append an internal lifecycle row snapshotting the current
    /// machine value and context.
    pub fn lifecycle(&mut self, event_type: String, leaves: &[usize], context: &Context) {
        self.records.push(EventRecord {
            event_type,
            source: EventSource::Internal,
            payload: None,
            meta: None,
            version: self.definition.version,
            machine_value: self.definition.leaf_ids(leaves),
            context: context.snapshot(),
        });
    }

    /// Append the row for the event being processed. Its snapshot is
    /// filled in by [`Recorder::backfill`] once the micro-step
    /// completes — an event row reflects the machine *after* applying
    /// the event.
    pub fn trigger(
        &mut self,
        event_type: String,
        source: EventSource,
        payload: Option<Value>,
        meta: Option<Value>,
        version: u32,
    ) -> usize {
        self.records.push(EventRecord {
            event_type,
            source,
            payload,
            meta,
            version,
            machine_value: Vec::new(),
            context: Vec::new(),
        });
        self.records.len() - 1
    }

    /// Fill a trigger row's snapshot.
    pub fn backfill(&mut self, index: usize, leaves: &[usize], context: &Context) {
        let record = &mut self.records[index];
        record.machine_value = self.definition.leaf_ids(leaves);
        record.context = context.snapshot();
    }

    /// How many records have been captured.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Drop records captured after `mark`. Used to unwind the rows of
    /// a quiet no-op evaluation (synthetic eventless triggers whose
    /// guards declined).
    pub fn truncate(&mut self, mark: usize) {
        self.records.truncate(mark);
    }

    pub fn into_records(self) -> Vec<EventRecord> {
        self.records
    }
}
