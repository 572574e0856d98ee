#![deny(missing_docs)]
//! Data model and collaborator protocols for the statecraft runtime.
//!
//! `keel` is the bottom layer of the workspace: the event record and
//! archive row that every other crate speaks, plus the traits for the
//! three external collaborators the runtime depends on but does not
//! implement — the host persistence store ([`store::MachineStore`]),
//! the process-wide lock service ([`lock::LockService`]), and the
//! background job runner ([`job::JobRunner`]).
//!
//! It also owns the two concerns shared by stores and archival: the
//! field/blob compression codec ([`codec`]) and the process-level
//! runtime configuration ([`config`]).
//!
//! This crate is deliberately small and dependency-light. The machine
//! runtime itself lives in `statecraft`.

pub mod archive;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod job;
pub mod lock;
pub mod store;

pub use archive::ArchiveRow;
pub use config::{ArchivalConfig, CompressionConfig, RuntimeConfig};
pub use error::{CodecError, ConfigError, JobError, LockError, StoreError};
pub use event::{ContextSnapshot, Event, EventId, EventSource, SendEvent};
pub use job::{Job, JobKind, JobRunner, RetryPolicy};
pub use lock::LockService;
pub use store::{IdleRoot, MachineStore};
