//! Timeline replay — rebuild state from stored events.
//!
//! Replay re-applies nothing: it folds the recorded context
//! snapshots and takes the machine value from the last event. The
//! result is bit-equivalent to the live state that produced the
//! timeline.

use crate::context::Context;
use crate::definition::MachineDefinition;
use crate::error::MachineError;
use keel::event::{ContextEntry, Event};

/// State rebuilt from a timeline.
#[derive(Debug)]
pub struct RebuiltState {
    /// Active leaf ids at the last event.
    pub value: Vec<String>,
    /// Folded context.
    pub context: Context,
    /// Sequence number the next appended event must carry.
    pub next_sequence: u64,
}

/// Rebuild machine state from a root's ordered events.
///
/// Verifies the timeline invariants before trusting it: a single root
/// shared by every event, the first event being that root, and dense
/// sequence numbers starting at 1. Violations mean corruption (or a
/// definition/timeline mismatch) and surface as
/// [`MachineError::RestoringState`].
///
/// Events carry a per-row `version`; replay folds snapshots verbatim
/// regardless of it. Migrating context across definition versions is
/// the host's concern.
pub fn rebuild(
    definition: &MachineDefinition,
    events: &[Event],
) -> Result<RebuiltState, MachineError> {
    let Some(first) = events.first() else {
        return Err(MachineError::RestoringState(
            "timeline has no events".to_owned(),
        ));
    };
    if !first.is_root() {
        return Err(MachineError::RestoringState(format!(
            "first event {} does not identify itself as root {}",
            first.id, first.root_event_id
        )));
    }
    if first.machine_id != definition.id {
        return Err(MachineError::RestoringState(format!(
            "timeline belongs to machine {:?}, definition is {:?}",
            first.machine_id, definition.id
        )));
    }

    let mut entries: Vec<ContextEntry> = Vec::new();
    for (position, event) in events.iter().enumerate() {
        if event.root_event_id != first.root_event_id {
            return Err(MachineError::RestoringState(format!(
                "event {} belongs to root {}, expected {}",
                event.id, event.root_event_id, first.root_event_id
            )));
        }
        let expected = position as u64 + 1;
        if event.sequence_number != expected {
            return Err(MachineError::RestoringState(format!(
                "sequence gap at event {}: found {}, expected {expected}",
                event.id, event.sequence_number
            )));
        }
        if let Some(snapshot) = &event.context {
            snapshot.fold_into(&mut entries);
        }
    }

    let last = events.last().expect("checked non-empty");
    for id in &last.machine_value {
        if definition.state_index(id).is_none() {
            return Err(MachineError::RestoringState(format!(
                "recorded active state {id:?} is not part of definition {}",
                definition.id
            )));
        }
    }

    Ok(RebuiltState {
        value: last.machine_value.clone(),
        context: Context::from_entries(entries, definition.schema.clone()),
        next_sequence: last.sequence_number + 1,
    })
}
