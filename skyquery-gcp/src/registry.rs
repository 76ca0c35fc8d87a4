//! Named connections held by the host.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::GcpConnectionConfig;
use crate::connection::ConnectionManager;
use crate::Result;

/// Connections by name.
///
/// Each connection owns its own client cache; replacing or removing a
/// connection discards its clients once the last caller lets go.
#[derive(Default)]
pub struct Connections {
    connections: RwLock<HashMap<String, Arc<ConnectionManager>>>,
}

impl Connections {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up (or replace) a connection.
    pub fn connect(
        &self,
        name: impl Into<String>,
        config: GcpConnectionConfig,
    ) -> Result<Arc<ConnectionManager>> {
        let name = name.into();
        let manager = Arc::new(ConnectionManager::new(name.clone(), config)?);
        let replaced = self
            .connections
            .write()
            .insert(name.clone(), manager.clone())
            .is_some();
        if replaced {
            info!(connection = %name, "GCP connection replaced");
        }
        Ok(manager)
    }

    /// Look up a connection.
    pub fn get(&self, name: &str) -> Option<Arc<ConnectionManager>> {
        self.connections.read().get(name).cloned()
    }

    /// Tear down a connection. Returns whether it existed.
    pub fn disconnect(&self, name: &str) -> bool {
        let removed = self.connections.write().remove(name).is_some();
        if removed {
            info!(connection = %name, "GCP connection closed");
        }
        removed
    }

    /// Names of all connections, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.connections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
