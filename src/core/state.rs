// Application state (AppState)

use crate::clients::client::TorrentClient;
use crate::core::config::Config;
use crate::metrics::collector::Metrics;
use crate::stores::snapshot_store::SnapshotStore;
use dashmap::DashMap;
use std::sync::Arc;

/// Shared application state
///
/// Cloned into every request handler and poll task; all fields are `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// One adapter per visible configured server
    pub clients: Arc<Vec<Arc<dyn TorrentClient>>>,

    /// Latest snapshot per server
    pub snapshots: Arc<SnapshotStore>,

    /// Last poll failure per server, cleared by the next success
    pub poll_errors: Arc<DashMap<String, String>>,

    pub metrics: Arc<Metrics>,

    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, clients: Vec<Arc<dyn TorrentClient>>) -> Self {
        Self {
            clients: Arc::new(clients),
            snapshots: Arc::new(SnapshotStore::new()),
            poll_errors: Arc::new(DashMap::new()),
            metrics: Arc::new(Metrics::new()),
            config: Arc::new(config),
        }
    }

    pub fn client(&self, name: &str) -> Option<&Arc<dyn TorrentClient>> {
        self.clients.iter().find(|c| c.server().name == name)
    }
}
