//! Error types for definition compilation and machine execution.

use crate::behavior::BehaviorKind;
use keel::{LockError, StoreError};
use thiserror::Error;

/// Errors raised while compiling a machine definition. These prevent
/// machine construction; nothing here can occur at runtime.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// A final state declared children.
    #[error("final state {0} must not declare children")]
    InvalidFinalStateDefinition(String),

    /// A parallel state has no children or declares `initial`.
    #[error("parallel state {id}: {reason}")]
    InvalidParallelStateDefinition {
        /// The offending state id.
        id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two configured states collapse onto the same dotted path.
    #[error("ambiguous state definition: {0}")]
    AmbiguousStateDefinitions(String),

    /// A validation guard appears outside the first branch of a
    /// guarded multi-branch transition.
    #[error(
        "validation guard {guard} must only guard the first branch of {state} on {event_type}"
    )]
    InvalidGuardedTransition {
        /// The validation guard's name.
        guard: String,
        /// The state owning the transition.
        state: String,
        /// The transition's event key.
        event_type: String,
    },

    /// A configured behavior name is absent from the behavior map.
    #[error("behavior not found: {kind} {name:?}")]
    BehaviorNotFound {
        /// Which of the five kinds was looked up.
        kind: BehaviorKind,
        /// The unresolved name.
        name: String,
    },

    /// A transition names a target state that does not exist.
    #[error("unknown target state {target:?} in transition from {state}")]
    UnknownTargetState {
        /// The state owning the transition.
        state: String,
        /// The unresolvable target.
        target: String,
    },

    /// The configuration tree itself could not be parsed.
    #[error("invalid machine config: {0}")]
    InvalidConfig(String),
}

/// Errors raised while executing a machine.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MachineError {
    /// A behavior reference could not be resolved at runtime.
    #[error("behavior not found: {kind} {name:?}")]
    BehaviorNotFound {
        /// Which of the five kinds was looked up.
        kind: BehaviorKind,
        /// The unresolved name.
        name: String,
    },

    /// A behavior's `required_context` key is absent or mistyped.
    #[error("missing machine context for {behavior}: {detail}")]
    MissingMachineContext {
        /// The behavior about to be invoked.
        behavior: String,
        /// Which key is missing or mistyped.
        detail: String,
    },

    /// A sent event failed its declared validation, or used a reserved
    /// type.
    #[error("event validation failed for {event_type}: {message}")]
    MachineEventValidation {
        /// The offending event type.
        event_type: String,
        /// The validation message.
        message: String,
    },

    /// The context violated its schema.
    #[error("context validation failed: {0}")]
    MachineContextValidation(String),

    /// No active state (nor ancestor) handles the sent event, and the
    /// definition's unhandled-event policy is `Error`.
    #[error("no transition definition found for {event_type} in {state}")]
    NoTransitionDefinitionFound {
        /// The unhandled event type.
        event_type: String,
        /// The active state value at the time of the send.
        state: String,
    },

    /// The instance lock could not be acquired within the wait bound.
    /// The caller may retry.
    #[error("machine already running: {root}")]
    MachineAlreadyRunning {
        /// Root event id of the contended instance.
        root: String,
    },

    /// Replay could not reconstruct a valid state.
    #[error("could not restore machine state: {0}")]
    RestoringState(String),

    /// Consecutive eventless steps exceeded the configured bound.
    #[error("eventless transition cycle in {state}: {limit} consecutive steps")]
    EventlessCycle {
        /// The state the loop was detected in.
        state: String,
        /// The configured bound.
        limit: usize,
    },

    /// A guard, action or calculator returned an error.
    #[error("{kind} {name:?} failed: {message}")]
    BehaviorFailed {
        /// The failing behavior's kind.
        kind: BehaviorKind,
        /// The failing behavior's name.
        name: String,
        /// Its error message.
        message: String,
    },

    /// A definition error surfaced through a runtime entry point.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// The persistence store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The lock service failed for a reason other than contention.
    #[error("lock error: {0}")]
    Lock(LockError),

    /// An archive blob could not be decoded during transparent restore.
    #[error("codec error: {0}")]
    Codec(#[from] keel::CodecError),
}
