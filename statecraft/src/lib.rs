#![deny(missing_docs)]
//! Event-sourced hierarchical state-machine runtime.
//!
//! A machine is declared as a configuration tree (states, transitions,
//! entry/exit actions, guards, calculators) plus a behavior map, and
//! executed against an append-only event log: every sent event, every
//! lifecycle signal, and every raised follow-up is recorded with the
//! resulting machine value and context snapshot. An instance is
//! identified by its root event id and can be rebuilt at any time by
//! replaying its timeline.
//!
//! The pieces, bottom up:
//!
//! - [`definition`] — config tree → immutable state graph
//!   (compilation is where all structural validation happens)
//! - [`behavior`] — the five-kind registry of user callables
//! - [`context`] — ordered, optionally typed key/value state
//! - [`queue`] — raised-event FIFO, drained per macro-step
//! - [`engine`] — the pure micro-step algorithm
//! - [`machine`] — the actor: locking, persistence, replay
//! - [`cast`] — store a machine as its root id inside host models
//!
//! Collaborator protocols (store, locks, jobs) and the event data
//! model live in [`keel`], re-exported here. Archival lives in the
//! `statecraft-archive` crate.
//!
//! ```no_run
//! use serde_json::json;
//! use statecraft::keel::{LockService, MachineStore};
//! use statecraft::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo(store: Arc<dyn MachineStore>, locks: Arc<dyn LockService>) -> Result<(), MachineError> {
//! let config = json!({
//!     "id": "traffic",
//!     "initial": "green",
//!     "states": {
//!         "green":  { "on": { "NEXT": "yellow" } },
//!         "yellow": { "on": { "NEXT": "red" } },
//!         "red":    { "on": { "NEXT": "green" } },
//!     },
//! });
//! let definition = Arc::new(compile(&config, Behaviors::new())?);
//! let mut machine = Machine::start(definition, store, locks).await?;
//! machine.send("NEXT").await?;
//! assert_eq!(machine.value(), ["traffic.yellow"]);
//! # Ok(())
//! # }
//! ```

pub use keel;

pub mod behavior;
pub mod cast;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod machine;
pub mod queue;
pub mod replay;

pub use behavior::{Behaviors, RequiredKey};
pub use cast::MachineRef;
pub use context::{Context, ContextSchema, ValueKind};
pub use definition::compiler::{compile, compile_with, CompileOptions};
pub use definition::{MachineDefinition, UnhandledEventPolicy};
pub use error::{DefinitionError, MachineError};
pub use machine::{Machine, MachineState};

/// The common imports for defining and running machines.
pub mod prelude {
    pub use crate::behavior::{Behaviors, RequiredKey};
    pub use crate::cast::MachineRef;
    pub use crate::context::{Context, ContextSchema, ValueKind};
    pub use crate::definition::compiler::{compile, compile_with, CompileOptions};
    pub use crate::definition::UnhandledEventPolicy;
    pub use crate::error::{DefinitionError, MachineError};
    pub use crate::machine::{Machine, MachineState};
    pub use keel::{EventId, SendEvent};
}
