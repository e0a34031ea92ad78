// ── Per-instance REST clients ──
//
// Built lazily from the fleet's base URL and the shared transport
// settings, then cached until the instance is forgotten.

use std::sync::Arc;

use dashmap::DashMap;

use chorus_api::{RestClient, TransportConfig};

use crate::error::CoreError;
use crate::fleet::Fleet;
use crate::model::InstanceId;

#[derive(Debug)]
pub struct RestClients {
    fleet: Arc<Fleet>,
    transport: TransportConfig,
    clients: DashMap<InstanceId, RestClient>,
}

impl RestClients {
    pub fn new(fleet: Arc<Fleet>, transport: TransportConfig) -> Self {
        Self {
            fleet,
            transport,
            clients: DashMap::new(),
        }
    }

    /// The REST client for `id`, built on first use.
    pub fn get(&self, id: &InstanceId) -> Result<RestClient, CoreError> {
        if let Some(client) = self.clients.get(id) {
            return Ok(client.value().clone());
        }
        let base_url = self.fleet.base_url(id)?;
        let client = RestClient::new(base_url, &self.transport)?;
        self.clients.insert(id.clone(), client.clone());
        Ok(client)
    }

    /// Drop the cached client, e.g. after the instance's URL changed.
    pub fn forget(&self, id: &InstanceId) {
        self.clients.remove(id);
    }
}
