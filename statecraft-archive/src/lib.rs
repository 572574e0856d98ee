#![deny(missing_docs)]
//! Cold-timeline archival for statecraft.
//!
//! Timelines that have gone quiet are moved out of the event log into
//! a compact archive row, and transparently restored when someone
//! needs them again. Three pieces:
//!
//! - [`Archiver`] — per-root mechanics: lock, load, compress, swap
//!   the rows; plus the two restore paths.
//! - [`Sweeper`] — the out-of-band coordinator: eligibility scan,
//!   deduplicated job fan-out, retention pruning.
//! - [`ArchiveError`] — what can go wrong.
//!
//! The sweeper only describes work (it dispatches one `archive-<root>`
//! job per eligible root through the host's job runner); executing a
//! job means calling back into [`Archiver::archive_root`], which
//! [`Sweeper::run_job`] wires up for in-process runners and tests.

mod archiver;
mod error;
mod sweeper;

pub use archiver::{ArchiveOutcome, Archiver};
pub use error::ArchiveError;
pub use sweeper::Sweeper;
