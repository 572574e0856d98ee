//! The JobRunner protocol — out-of-band work dispatch.

use crate::error::JobError;
use crate::event::EventId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wall-clock timeout for a single-root archival job.
pub const SINGLE_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Wall-clock timeout for a batch job (sweep, prune).
pub const BATCH_JOB_TIMEOUT: Duration = Duration::from_secs(1800);

/// Retry policy for dispatched jobs: `attempts` tries with exponential
/// backoff seeded at `backoff_base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubles per subsequent retry.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based). Saturates rather
    /// than overflowing for absurd retry counts.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

/// What a dispatched job does.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Archive one timeline.
    ArchiveRoot {
        /// Root to archive.
        root_event_id: EventId,
    },
    /// Scan for eligible roots and fan out `ArchiveRoot` jobs.
    ArchiveSweep,
    /// Delete archives past the retention window.
    PruneArchives,
}

/// A unit of out-of-band work handed to the host's job runner.
///
/// `unique_key` deduplicates: the runner must drop a dispatch whose key
/// matches a job already queued or running.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Dedup key, e.g. `archive-<root>`.
    pub unique_key: String,
    /// Optional dedicated queue name; None means the runner's default.
    pub queue: Option<String>,
    /// Hard wall-clock timeout.
    pub timeout: Duration,
    /// Retry policy on failure.
    pub retry: RetryPolicy,
    /// The work itself.
    pub kind: JobKind,
}

impl Job {
    /// An archival job for one root, keyed `archive-<root>` so
    /// concurrent sweeps collapse to a single run per timeline.
    pub fn archive_root(root: EventId, queue: Option<String>) -> Self {
        Self {
            unique_key: format!("archive-{root}"),
            queue,
            timeout: SINGLE_JOB_TIMEOUT,
            retry: RetryPolicy::default(),
            kind: JobKind::ArchiveRoot {
                root_event_id: root,
            },
        }
    }

    /// A sweep job.
    pub fn sweep(queue: Option<String>) -> Self {
        Self {
            unique_key: "archive-sweep".to_owned(),
            queue,
            timeout: BATCH_JOB_TIMEOUT,
            retry: RetryPolicy::default(),
            kind: JobKind::ArchiveSweep,
        }
    }

    /// A retention-pruning job.
    pub fn prune(queue: Option<String>) -> Self {
        Self {
            unique_key: "archive-prune".to_owned(),
            queue,
            timeout: BATCH_JOB_TIMEOUT,
            retry: RetryPolicy::default(),
            kind: JobKind::PruneArchives,
        }
    }
}

/// Contract for the host's background job runner.
///
/// The runner owns scheduling, timeout enforcement, and retries; the
/// runtime only describes the work. Long-running behavior side effects
/// belong here, never inside a macro-step.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Enqueue a job. Dispatching a `unique_key` that is already
    /// queued or running is a silent no-op, not an error.
    async fn dispatch(&self, job: Job) -> Result<(), JobError>;
}
