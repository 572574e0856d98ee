//! The archival coordinator: eligibility scan, job fan-out, retention.

use crate::archiver::Archiver;
use crate::error::ArchiveError;
use chrono::{Duration, Utc};
use keel::event::EventId;
use keel::{Job, JobKind, JobRunner, MachineStore, RuntimeConfig};
use std::sync::Arc;

/// Scans for cold timelines and dispatches archival work.
///
/// A root is eligible when its newest event predates the (per-machine
/// resolved) inactivity window, it has no archive row, and its last
/// restore — if any — is older than the cooldown. Up to
/// `dispatch_limit` roots are dispatched per sweep, one deduplicated
/// `archive-<root>` job each.
pub struct Sweeper {
    store: Arc<dyn MachineStore>,
    runner: Arc<dyn JobRunner>,
    config: RuntimeConfig,
}

impl Sweeper {
    /// A sweeper over the given store and job runner.
    pub fn new(
        store: Arc<dyn MachineStore>,
        runner: Arc<dyn JobRunner>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            store,
            runner,
            config,
        }
    }

    /// The widest inactivity window that could make any machine
    /// eligible: the store scan uses it, per-machine filtering
    /// narrows afterwards.
    fn scan_days(&self) -> u32 {
        self.config
            .archival
            .machine_overrides
            .values()
            .filter_map(|o| o.days_inactive)
            .chain([self.config.archival.days_inactive])
            .min()
            .unwrap_or(self.config.archival.days_inactive)
    }

    /// One sweep tick. Returns the roots dispatched for archival.
    pub async fn sweep(&self) -> Result<Vec<EventId>, ArchiveError> {
        if !self.config.archival.enabled {
            tracing::debug!("archival disabled, skipping sweep");
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let scan_cutoff = now - Duration::days(i64::from(self.scan_days()));
        let candidates = self
            .store
            .idle_roots(scan_cutoff, self.config.archival.dispatch_limit)
            .await?;

        let mut dispatched = Vec::new();
        for candidate in candidates {
            let policy = self.config.archival.for_machine(&candidate.machine_id);
            let cutoff = now - Duration::days(i64::from(policy.days_inactive));
            if candidate.last_activity_at >= cutoff {
                continue;
            }
            if let Some(restored_at) = self
                .store
                .last_restored_at(&candidate.root_event_id)
                .await?
            {
                let cooldown = Duration::hours(i64::from(policy.restore_cooldown_hours));
                if restored_at + cooldown > now {
                    continue;
                }
            }
            self.runner
                .dispatch(Job::archive_root(
                    candidate.root_event_id.clone(),
                    self.config.archival.queue.clone(),
                ))
                .await?;
            dispatched.push(candidate.root_event_id);
        }
        tracing::debug!(count = dispatched.len(), "archival sweep dispatched");
        Ok(dispatched)
    }

    /// Delete archives past the retention window. A `None` window
    /// keeps archives forever.
    pub async fn prune(&self) -> Result<u64, ArchiveError> {
        let Some(days) = self.config.archival.archive_retention_days else {
            return Ok(0);
        };
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let pruned = self.store.prune_archives(cutoff).await?;
        if pruned > 0 {
            tracing::debug!(count = pruned, "pruned expired archives");
        }
        Ok(pruned)
    }

    /// Execute one dispatched job. Hosts with a real job runner call
    /// the equivalent of this from their worker.
    pub async fn run_job(&self, archiver: &Archiver, job: &Job) -> Result<(), ArchiveError> {
        match &job.kind {
            JobKind::ArchiveRoot { root_event_id } => {
                archiver.archive_root(root_event_id).await?;
            }
            JobKind::ArchiveSweep => {
                self.sweep().await?;
            }
            JobKind::PruneArchives => {
                self.prune().await?;
            }
            _ => {}
        }
        Ok(())
    }
}
