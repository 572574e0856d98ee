//! The machine event record — one row of a timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a single machine event. A 26-character ULID string,
/// which keeps ids lexicographically ordered by creation time.
///
/// The id of the *first* event of a timeline doubles as the identifier
/// of the machine instance itself (the root event id).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a fresh ULID-backed id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Whether an event was sent by a caller or emitted by the runtime.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    /// Sent through `Machine::send` by the host application.
    External,
    /// Emitted by the engine: lifecycle records and raised events.
    Internal,
}

/// One entry of a context snapshot. Entries are kept as an explicit
/// ordered list rather than a JSON object so that insertion order
/// survives serialization — replay must reproduce the live context
/// bit-for-bit, including key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Context key.
    pub key: String,
    /// Value at snapshot time.
    pub value: serde_json::Value,
}

impl ContextEntry {
    /// Create an entry.
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// The context column of an event row. The first event of a timeline
/// carries a full snapshot; subsequent events carry deltas against the
/// previous row. Folding the snapshots of a timeline in sequence order
/// reproduces the live context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextSnapshot {
    /// Complete context contents, in insertion order.
    Full {
        /// Every key currently present.
        entries: Vec<ContextEntry>,
    },
    /// Changes relative to the previous event row.
    Delta {
        /// Keys written since the previous row, in write order.
        set: Vec<ContextEntry>,
        /// Keys removed since the previous row.
        unset: Vec<String>,
    },
}

impl ContextSnapshot {
    /// An empty delta — recorded for events that did not touch context.
    pub fn empty_delta() -> Self {
        Self::Delta {
            set: Vec::new(),
            unset: Vec::new(),
        }
    }

    /// Apply this snapshot on top of `entries` (key → value, ordered).
    /// `Full` replaces the contents; `Delta` upserts and removes.
    pub fn fold_into(&self, entries: &mut Vec<ContextEntry>) {
        match self {
            Self::Full {
                entries: full_entries,
            } => {
                *entries = full_entries.clone();
            }
            Self::Delta { set, unset } => {
                for entry in set {
                    match entries.iter_mut().find(|e| e.key == entry.key) {
                        Some(existing) => existing.value = entry.value.clone(),
                        None => entries.push(entry.clone()),
                    }
                }
                entries.retain(|e| !unset.contains(&e.key));
            }
        }
    }
}

/// An immutable machine event. Events are append-only: once inserted
/// into the store they are never mutated, and a timeline is rebuilt by
/// reading them back in `sequence_number` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// ULID of this event.
    pub id: EventId,
    /// Position within the timeline. Starts at 1, dense, strictly
    /// increasing per root.
    pub sequence_number: u64,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
    /// Name of the machine definition this event belongs to.
    pub machine_id: String,
    /// Active leaf state ids after applying this event.
    pub machine_value: Vec<String>,
    /// Id of the first event of the timeline. The first event's
    /// `root_event_id` equals its own `id`.
    pub root_event_id: EventId,
    /// Caller-sent or runtime-emitted.
    pub source: EventSource,
    /// Event type string (lifecycle name or caller-defined type).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Caller-supplied payload, if any.
    pub payload: Option<serde_json::Value>,
    /// Context snapshot after applying this event.
    pub context: Option<ContextSnapshot>,
    /// Free-form metadata.
    pub meta: Option<serde_json::Value>,
    /// Event schema version, >= 1.
    pub version: u32,
}

impl Event {
    /// Whether this event is the root of its timeline.
    pub fn is_root(&self) -> bool {
        self.id == self.root_event_id
    }
}

/// Reserved key for eventless transitions, evaluated on state entry and
/// after context-changing actions rather than on an external event.
pub const ALWAYS_EVENT: &str = "@always";

/// Reserved key for completion transitions, synthesized when every
/// region of a parallel state (or the sole child chain of a compound
/// state) reaches a final leaf.
pub const DONE_EVENT: &str = "@done";

/// Whether an event type is reserved for the runtime and therefore
/// rejected by `Machine::send`. Covers the `@`-prefixed marker keys and
/// the lifecycle namespaces `machine.` / `<machine_id>.`.
pub fn is_reserved_type(event_type: &str, machine_id: &str) -> bool {
    event_type.starts_with('@')
        || event_type.starts_with("machine.")
        || event_type.starts_with(&format!("{machine_id}."))
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

/// The wire shape accepted by `Machine::send`.
///
/// Only `type` is required. `is_transactional` defaults to true: the
/// events produced by the macro-step are appended inside one store
/// transaction and rolled back together on failure.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEvent {
    /// Event type to dispatch.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Structured payload handed to behaviors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Event schema version; defaults to 1.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Who sent the event. Recorded into `meta`, not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<serde_json::Value>,
    /// Whether the macro-step commits atomically.
    #[serde(default = "default_true")]
    pub is_transactional: bool,
    /// Source override. Defaults to [`EventSource::External`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSource>,
}

impl SendEvent {
    /// A bare event of the given type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: None,
            version: 1,
            actor: None,
            is_transactional: true,
            source: None,
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Mark the event non-transactional: appends happen row by row and
    /// action side effects survive a mid-step failure.
    pub fn non_transactional(mut self) -> Self {
        self.is_transactional = false;
        self
    }

    /// Record who sent the event.
    pub fn with_actor(mut self, actor: serde_json::Value) -> Self {
        self.actor = Some(actor);
        self
    }
}

impl From<&str> for SendEvent {
    fn from(event_type: &str) -> Self {
        Self::new(event_type)
    }
}
