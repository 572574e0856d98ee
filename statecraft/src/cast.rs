//! Model-field glue: persist a machine as its root event id.
//!
//! Host models that carry a machine-valued field store only the root
//! ULID; on load the machine is rebuilt from the store. `MachineRef`
//! serializes transparently as that id string, so it can sit directly
//! in a serde model struct.

use crate::definition::MachineDefinition;
use crate::error::MachineError;
use crate::machine::Machine;
use keel::{EventId, LockService, MachineStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A persisted reference to a machine instance.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineRef(EventId);

impl MachineRef {
    /// Reference an instance by its root event id.
    pub fn new(root: EventId) -> Self {
        Self(root)
    }

    /// The referenced root event id.
    pub fn root_event_id(&self) -> &EventId {
        &self.0
    }

    /// Rebuild the running machine this reference points at.
    pub async fn hydrate(
        &self,
        definition: Arc<MachineDefinition>,
        store: Arc<dyn MachineStore>,
        locks: Arc<dyn LockService>,
    ) -> Result<Machine, MachineError> {
        Machine::load(definition, store, locks, self.0.clone()).await
    }
}

impl From<&Machine> for MachineRef {
    fn from(machine: &Machine) -> Self {
        Self(machine.root_event_id().clone())
    }
}

impl fmt::Display for MachineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
