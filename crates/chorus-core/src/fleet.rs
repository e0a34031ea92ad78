// ── Fleet state ──
//
// The set of configured instances and the connection status the UI shows
// for each. Status here mirrors what the coordinator observes; the
// Connection itself stays the single writer of its own state machine.

use dashmap::DashMap;
use tokio::sync::watch;
use url::Url;

use crate::error::CoreError;
use crate::model::{ConnectionStatus, Instance, InstanceId};
use crate::registry::InstanceRegistry;

/// Top-level owner of [`Instance`] records.
#[derive(Debug)]
pub struct Fleet {
    instances: DashMap<InstanceId, Instance>,
    statuses: InstanceRegistry<watch::Sender<ConnectionStatus>>,
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            statuses: InstanceRegistry::new(|_| watch::Sender::new(ConnectionStatus::Disconnected)),
        }
    }

    /// Add or replace an instance. Returns the previous record, if any.
    pub fn add(&self, instance: Instance) -> Option<Instance> {
        self.instances.insert(instance.id.clone(), instance)
    }

    /// Forget an instance and its status channel.
    pub fn remove(&self, id: &InstanceId) -> Option<Instance> {
        self.statuses.clear(id);
        self.instances.remove(id).map(|(_, v)| v)
    }

    pub fn get(&self, id: &InstanceId) -> Option<Instance> {
        self.instances.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.instances.contains_key(id)
    }

    /// All instances, sorted by id for stable output.
    pub fn list(&self) -> Vec<Instance> {
        let mut all: Vec<Instance> = self.instances.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Base address of a known instance.
    pub fn base_url(&self, id: &InstanceId) -> Result<Url, CoreError> {
        self.instances
            .get(id)
            .map(|e| e.base_url.clone())
            .ok_or_else(|| CoreError::UnknownInstance { id: id.clone() })
    }

    // ── Status ───────────────────────────────────────────────────────

    pub fn status(&self, id: &InstanceId) -> ConnectionStatus {
        self.statuses
            .peek(id)
            .map_or(ConnectionStatus::Disconnected, |tx| *tx.borrow())
    }

    /// Watch an instance's status. The channel survives reconnects but is
    /// replaced if the instance is removed and re-added.
    pub fn subscribe_status(&self, id: &InstanceId) -> watch::Receiver<ConnectionStatus> {
        self.statuses.get(id).subscribe()
    }

    pub fn set_status(&self, id: &InstanceId, status: ConnectionStatus) {
        self.statuses.get(id).send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
