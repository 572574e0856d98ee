//! The machine actor — couples a definition to a persistent timeline.
//!
//! The actor owns the live state of one instance, identified by its
//! root event id. Every mutation happens under the instance lock:
//! acquire, run one macro-step through the engine, persist the
//! produced events (transactionally by default), release.

use crate::behavior::{Exec, Trigger};
use crate::context::{diff_snapshots, Context};
use crate::definition::{MachineDefinition, TransitionLookup};
use crate::engine::{EventRecord, TransitionEngine};
use crate::error::MachineError;
use crate::replay;
use chrono::Utc;
use keel::event::{is_reserved_type, ContextEntry, ContextSnapshot, EventSource};
use keel::lock::{machine_lock_key, DEFAULT_LOCK_WAIT};
use keel::{Event, EventId, LockError, LockService, MachineStore, SendEvent, StoreError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// The runtime state of one machine instance: active leaves, context,
/// and the event history that produced them.
#[derive(Debug)]
pub struct MachineState {
    /// Active leaf state ids, in document order.
    pub value: Vec<String>,
    /// The running context.
    pub context: Context,
    /// Every event of the timeline, oldest first.
    pub history: Vec<Event>,
}

impl MachineState {
    /// Whether a state id is in the active leaf set.
    pub fn is_active(&self, id: &str) -> bool {
        self.value.iter().any(|v| v == id)
    }
}

/// A running machine instance.
pub struct Machine {
    definition: Arc<MachineDefinition>,
    store: Arc<dyn MachineStore>,
    locks: Arc<dyn LockService>,
    state: MachineState,
    root: EventId,
    next_sequence: u64,
    last_snapshot: Vec<ContextEntry>,
    pending: Vec<Event>,
    lock_wait: Duration,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("definition", &self.definition)
            .field("state", &self.state)
            .field("root", &self.root)
            .field("next_sequence", &self.next_sequence)
            .field("last_snapshot", &self.last_snapshot)
            .field("pending", &self.pending)
            .field("lock_wait", &self.lock_wait)
            .finish()
    }
}

impl Machine {
    /// Start a fresh instance: run the initial entry chain, record
    /// its events (the first being the machine's root event), and
    /// persist them.
    ///
    /// No lock is taken — the root id does not exist anywhere else
    /// yet, so nothing can contend.
    pub async fn start(
        definition: Arc<MachineDefinition>,
        store: Arc<dyn MachineStore>,
        locks: Arc<dyn LockService>,
    ) -> Result<Self, MachineError> {
        let report = {
            let engine = TransitionEngine::new(&definition);
            engine.start()
        };
        if let Some(error) = report.error {
            return Err(error);
        }

        let mut machine = Self {
            definition,
            store,
            locks,
            state: MachineState {
                value: report.value,
                context: report.context,
                history: Vec::new(),
            },
            root: EventId::new(""),
            next_sequence: 1,
            last_snapshot: Vec::new(),
            pending: Vec::new(),
            lock_wait: DEFAULT_LOCK_WAIT,
        };
        let events = machine.materialize(report.records);
        machine.pending = events;
        machine.persist().await?;
        tracing::debug!(
            machine = %machine.definition.id,
            root = %machine.root,
            value = ?machine.state.value,
            "machine started"
        );
        Ok(machine)
    }

    /// Reconstruct an instance from its root event id by replaying
    /// the stored timeline. If the timeline was archived, it is
    /// transparently restored first.
    ///
    /// Behaviors are not re-executed during replay — only their
    /// recorded effects on context and machine value are restored, so
    /// side effects outside the context (e.g. rows an action wrote)
    /// are not re-applied.
    pub async fn load(
        definition: Arc<MachineDefinition>,
        store: Arc<dyn MachineStore>,
        locks: Arc<dyn LockService>,
        root: EventId,
    ) -> Result<Self, MachineError> {
        let mut events = store.events_for_root(&root).await?;
        if events.is_empty() {
            let Some(row) = store.archive_row(&root).await? else {
                return Err(MachineError::RestoringState(format!(
                    "no events recorded for root {root}"
                )));
            };
            let decoded = keel::codec::decode_events(&row.payload)?;
            store.restore_from_archive(&root, &decoded).await?;
            tracing::debug!(root = %root, events = decoded.len(), "restored archived timeline");
            events = decoded;
        }

        let rebuilt = replay::rebuild(&definition, &events)?;
        let last_snapshot = rebuilt.context.snapshot();
        Ok(Self {
            definition,
            store,
            locks,
            state: MachineState {
                value: rebuilt.value,
                context: rebuilt.context,
                history: events,
            },
            root,
            next_sequence: rebuilt.next_sequence,
            last_snapshot,
            pending: Vec::new(),
            lock_wait: DEFAULT_LOCK_WAIT,
        })
    }

    /// Override the lock acquisition wait (default 60s).
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Apply one external event and return the new state.
    ///
    /// The instance lock is held for the whole macro-step and
    /// released after persistence completes, success or not.
    pub async fn send(
        &mut self,
        event: impl Into<SendEvent>,
    ) -> Result<&MachineState, MachineError> {
        let send = event.into();
        let source = send.source.unwrap_or(EventSource::External);
        if source == EventSource::External
            && is_reserved_type(&send.event_type, &self.definition.id)
        {
            return Err(MachineError::MachineEventValidation {
                event_type: send.event_type.clone(),
                message: "event type is reserved for internal lifecycle events".to_owned(),
            });
        }
        self.definition.behaviors.check_event(
            &self.state.context,
            &send.event_type,
            send.payload.as_ref(),
        )?;

        let key = machine_lock_key(&self.root);
        match self.locks.acquire(&key, self.lock_wait).await {
            Ok(()) => {}
            Err(LockError::Contended { .. }) => {
                return Err(MachineError::MachineAlreadyRunning {
                    root: self.root.to_string(),
                });
            }
            Err(other) => return Err(MachineError::Lock(other)),
        }

        let outcome = self.apply(send, source).await;
        if let Err(error) = self.locks.release(&key).await {
            tracing::warn!(key = %key, %error, "failed to release machine lock");
        }
        outcome?;
        Ok(&self.state)
    }

    async fn apply(&mut self, send: SendEvent, source: EventSource) -> Result<(), MachineError> {
        let version = self
            .definition
            .behaviors
            .event_entry(&send.event_type)
            .map(|entry| entry.version())
            .unwrap_or(send.version);
        let trigger = Trigger {
            event_type: send.event_type.clone(),
            payload: send.payload.clone(),
            version,
            source,
            meta: send.actor.clone().map(|actor| json!({ "actor": actor })),
        };

        let report = {
            let definition = Arc::clone(&self.definition);
            let engine = TransitionEngine::new(&definition);
            engine.step(&self.state.value, self.state.context.clone(), trigger)
        };

        match report.error {
            None => {
                let events = self.materialize(report.records);
                self.pending.extend(events);
                self.persist_pending(send.is_transactional).await?;
                self.state.value = report.value;
                self.state.context = report.context;
                tracing::debug!(
                    machine = %self.definition.id,
                    root = %self.root,
                    event = %send.event_type,
                    value = ?self.state.value,
                    "event applied"
                );
                Ok(())
            }
            Some(error) => {
                if !send.is_transactional {
                    // Non-transactional: keep everything recorded up
                    // to the failure, including the `.fail` row. If
                    // the flush itself fails, persist_pending drops
                    // the batch and realigns sequencing — the engine
                    // error still wins.
                    let events = self.materialize(report.records);
                    self.pending.extend(events);
                    if let Err(store_error) = self.persist_pending(false).await {
                        tracing::warn!(
                            root = %self.root,
                            %store_error,
                            "failed to persist partial macro-step"
                        );
                    }
                }
                Err(error)
            }
        }
    }

    /// Flush pending history to the store.
    pub async fn persist(&mut self) -> Result<(), MachineError> {
        self.persist_pending(true).await
    }

    async fn persist_pending(&mut self, transactional: bool) -> Result<(), MachineError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if transactional {
            if let Err(error) = self.store.append(&self.pending).await {
                // The batch was atomic, so nothing landed. Drop it:
                // a failed batch must never merge into a later flush.
                self.pending.clear();
                self.resync_sequencing();
                return Err(error.into());
            }
            self.state.history.append(&mut self.pending);
            return Ok(());
        }

        let total = self.pending.len();
        let appended = match self.store.append_each(&self.pending).await {
            Ok(count) => count.min(total),
            Err(error) => {
                self.pending.clear();
                self.resync_sequencing();
                return Err(error.into());
            }
        };
        // The durable prefix joins the history; the rejected tail is
        // dropped, never retried.
        let mut durable: Vec<Event> = self.pending.drain(..appended).collect();
        self.state.history.append(&mut durable);
        self.pending.clear();
        if appended < total {
            self.resync_sequencing();
            return Err(MachineError::Store(StoreError::PartialAppend {
                appended,
                total,
            }));
        }
        Ok(())
    }

    /// Realign sequencing with the last durable event after a failed
    /// flush. The snapshot base is re-folded from the stored rows so
    /// the next delta is computed against what the store actually
    /// holds.
    fn resync_sequencing(&mut self) {
        self.next_sequence = self
            .state
            .history
            .last()
            .map(|event| event.sequence_number + 1)
            .unwrap_or(1);
        let mut entries: Vec<ContextEntry> = Vec::new();
        for event in &self.state.history {
            if let Some(snapshot) = &event.context {
                snapshot.fold_into(&mut entries);
            }
        }
        self.last_snapshot = entries;
    }

    /// Turn engine records into event rows: assign ids, dense
    /// sequence numbers and timestamps, and convert the full context
    /// snapshots into the stored full/delta form.
    fn materialize(&mut self, records: Vec<EventRecord>) -> Vec<Event> {
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            let id = EventId::generate();
            if self.next_sequence == 1 && self.root.as_str().is_empty() {
                self.root = id.clone();
            }
            let snapshot = if self.next_sequence == 1 {
                ContextSnapshot::Full {
                    entries: record.context.clone(),
                }
            } else {
                let (set, unset) = diff_snapshots(&self.last_snapshot, &record.context);
                ContextSnapshot::Delta { set, unset }
            };
            events.push(Event {
                id,
                sequence_number: self.next_sequence,
                created_at: Utc::now(),
                machine_id: self.definition.id.clone(),
                machine_value: record.machine_value,
                root_event_id: self.root.clone(),
                source: record.source,
                event_type: record.event_type,
                payload: record.payload,
                context: Some(snapshot),
                meta: record.meta,
                version: record.version,
            });
            self.next_sequence += 1;
            self.last_snapshot = record.context;
        }
        events
    }

    // --- Introspection ---

    /// The current state.
    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// The instance's root event id.
    pub fn root_event_id(&self) -> &EventId {
        &self.root
    }

    /// Active leaf state ids.
    pub fn value(&self) -> &[String] {
        &self.state.value
    }

    /// The running context.
    pub fn context(&self) -> &Context {
        &self.state.context
    }

    /// Whether the active configuration sits in (or below) a state.
    pub fn matches(&self, state_id: &str) -> bool {
        let Some(index) = self.definition.state_index(state_id) else {
            return false;
        };
        self.state.value.iter().any(|leaf| {
            self.definition
                .state_index(leaf)
                .is_some_and(|l| self.definition.is_ancestor_or_self(index, l))
        })
    }

    /// Whether the current active set handles an event type — i.e.
    /// some active leaf (or one of its ancestors, barring a forbidden
    /// override) declares a transition for it.
    pub fn can(&self, event_type: &str) -> bool {
        self.state.value.iter().any(|leaf| {
            self.definition.state_index(leaf).is_some_and(|index| {
                matches!(
                    self.definition.lookup_transition(index, event_type),
                    TransitionLookup::Found { .. }
                )
            })
        })
    }

    /// Event types accepted from the current configuration.
    pub fn accepted_events(&self) -> Vec<String> {
        let mut accepted = Vec::new();
        for leaf in &self.state.value {
            if let Some(index) = self.definition.state_index(leaf) {
                for event_type in self.definition.accepted_from(index) {
                    if !accepted.contains(&event_type) {
                        accepted.push(event_type);
                    }
                }
            }
        }
        accepted
    }

    /// Event types accepted from a given state instead of the current
    /// configuration.
    pub fn accepted_events_from(&self, state_id: &str) -> Vec<String> {
        self.definition
            .state_index(state_id)
            .map(|index| self.definition.accepted_from(index))
            .unwrap_or_default()
    }

    /// Run the definition's result behavior against the current
    /// context and the last event. None when no result behavior is
    /// configured.
    pub fn result(&self) -> Result<Option<serde_json::Value>, MachineError> {
        let Some(name) = &self.definition.result_behavior else {
            return Ok(None);
        };
        let trigger = match self.state.history.last() {
            Some(event) => Trigger {
                event_type: event.event_type.clone(),
                payload: event.payload.clone(),
                version: event.version,
                source: event.source,
                meta: event.meta.clone(),
            },
            None => Trigger::internal(crate::lifecycle::machine_start(&self.definition.id)),
        };
        let exec = Exec {
            trigger: &trigger,
            value: &self.state.value,
        };
        self.definition
            .behaviors
            .run_result(name, &self.state.context, &exec)
            .map(Some)
    }
}
