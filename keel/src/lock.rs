//! The LockService protocol — per-instance mutual exclusion.

use crate::error::LockError;
use crate::event::EventId;
use async_trait::async_trait;
use std::time::Duration;

/// How long `Machine::send` waits for the instance lock before giving
/// up with `MachineAlreadyRunning`.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(60);

/// The lock key guarding a machine instance. One macro-step at a time
/// per root; archival takes the same key to exclude concurrent
/// mutation while it swaps a timeline out.
pub fn machine_lock_key(root: &EventId) -> String {
    format!("machine:{root}")
}

/// Contract for the process-wide key/value lock service.
///
/// Critical sections are short — one macro-step or one archival swap —
/// so the protocol is a plain acquire-with-timeout plus release. No
/// reentrancy, no lease renewal.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquire `key`, waiting up to `wait`. Returns
    /// [`LockError::Contended`] if the lock is still held when the
    /// wait elapses.
    async fn acquire(&self, key: &str, wait: Duration) -> Result<(), LockError>;

    /// Release `key`. Releasing a key that is not held is an error —
    /// it indicates a double release or a lost acquire.
    async fn release(&self, key: &str) -> Result<(), LockError>;
}
