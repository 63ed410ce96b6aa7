//! Multi-layer state manager
//!
//! Orders layers fastest-to-slowest. Saves always hit the fastest layer
//! synchronously; slower layers are synced at most once per key per sync
//! interval (or immediately with `sync_all`). Loads walk the chain in
//! order and return the first hit.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::layer::{FileLayer, MemoryLayer, StateError, StateLayer};
use crate::record::SessionRecord;
use crate::{DEFAULT_MEMORY_CAPACITY, DEFAULT_SYNC_INTERVAL_SECS};

/// Ordered chain of persistence layers
pub struct StateManager {
    layers: Vec<Arc<dyn StateLayer>>,
    sync_interval: Duration,
    last_sync: Mutex<HashMap<String, Instant>>,
}

impl StateManager {
    /// Create an empty manager; add layers fastest-first
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            last_sync: Mutex::new(HashMap::new()),
        }
    }

    /// Create a manager with the standard memory + file chain
    pub fn with_default_layers(file_path: impl AsRef<Path>) -> Result<Self, StateError> {
        let mut manager = Self::new();
        manager.add_layer(Arc::new(MemoryLayer::with_capacity(DEFAULT_MEMORY_CAPACITY)));
        manager.add_layer(Arc::new(FileLayer::open(file_path)?));
        Ok(manager)
    }

    /// Override the fan-out sync throttle
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Append a layer to the chain (fastest layers first)
    pub fn add_layer(&mut self, layer: Arc<dyn StateLayer>) {
        debug!(layer = layer.name(), "StateManager::add_layer: called");
        self.layers.push(layer);
    }

    /// Number of configured layers
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Save a record
    ///
    /// Bumps the record's version, writes the fastest layer synchronously
    /// (its failure is the reported result), and fans out to slower layers
    /// when `sync_all` is set or the per-key throttle has elapsed. Fan-out
    /// failures are logged and skipped, never raised.
    pub async fn save(&self, record: &mut SessionRecord, sync_all: bool) -> Result<(), StateError> {
        let key = record.session_id.clone();
        record.touch();
        debug!(%key, version = record.version, sync_all, "StateManager::save: called");

        let Some(first) = self.layers.first() else {
            return Err(StateError::Unavailable {
                layer: "none".to_string(),
                reason: "no layers configured".to_string(),
            });
        };

        first.save(&key, record).await?;

        if sync_all || self.sync_due(&key).await {
            for layer in self.layers.iter().skip(1) {
                if let Err(e) = layer.save(&key, record).await {
                    warn!(layer = layer.name(), error = %e, %key, "Failed to sync state to layer");
                }
            }
            self.last_sync.lock().await.insert(key, Instant::now());
        }

        Ok(())
    }

    async fn sync_due(&self, key: &str) -> bool {
        let last_sync = self.last_sync.lock().await;
        match last_sync.get(key) {
            Some(at) => at.elapsed() >= self.sync_interval,
            None => true,
        }
    }

    /// Load the record for a session, first hit wins
    ///
    /// Layers are queried in order; a failing layer is logged and skipped.
    /// A hit on a slow layer is NOT backfilled into faster layers — known
    /// inefficiency, not a correctness problem, since the returned data is
    /// still the freshest available.
    pub async fn load(&self, session_id: &str) -> Option<SessionRecord> {
        debug!(%session_id, "StateManager::load: called");
        for layer in &self.layers {
            match layer.load(session_id).await {
                Ok(Some(record)) => {
                    debug!(layer = layer.name(), %session_id, "StateManager::load: hit");
                    return Some(record);
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(layer = layer.name(), error = %e, %session_id, "State layer load failed");
                    continue;
                }
            }
        }
        None
    }

    /// Delete a session from every layer
    pub async fn delete(&self, session_id: &str) -> Result<(), StateError> {
        debug!(%session_id, "StateManager::delete: called");
        let mut result = Ok(());
        for layer in &self.layers {
            if let Err(e) = layer.delete(session_id).await {
                warn!(layer = layer.name(), error = %e, %session_id, "Failed to delete from layer");
                result = Err(e);
            }
        }
        self.last_sync.lock().await.remove(session_id);
        result
    }

    /// List every stored session, via the first layer that can enumerate
    pub async fn all_sessions(&self) -> Vec<SessionRecord> {
        for layer in &self.layers {
            let keys = match layer.keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(layer = layer.name(), error = %e, "State layer cannot enumerate keys");
                    continue;
                }
            };

            let mut sessions = Vec::with_capacity(keys.len());
            for key in keys {
                if let Ok(Some(record)) = layer.load(&key).await {
                    sessions.push(record);
                }
            }
            return sessions;
        }
        Vec::new()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
