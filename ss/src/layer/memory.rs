//! In-memory persistence layer
//!
//! Fastest layer, volatile. Capacity-bounded: at capacity the least
//! recently accessed record is evicted to make room.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::{StateError, StateLayer};
use crate::DEFAULT_MEMORY_CAPACITY;
use crate::record::SessionRecord;

struct MemoryInner {
    storage: HashMap<String, SessionRecord>,
    access_times: HashMap<String, Instant>,
}

/// Volatile in-memory layer
pub struct MemoryLayer {
    inner: Mutex<MemoryInner>,
    max_size: usize,
}

impl MemoryLayer {
    /// Create a layer with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Create a layer bounded to `max_size` records
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                storage: HashMap::new(),
                access_times: HashMap::new(),
            }),
            max_size,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.lock().storage.len()
    }

    /// Whether the layer holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateLayer for MemoryLayer {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, key: &str, record: &SessionRecord) -> Result<(), StateError> {
        let mut inner = self.lock();

        // Evict the least recently accessed record when at capacity
        if inner.storage.len() >= self.max_size && !inner.storage.contains_key(key) {
            if let Some(oldest) = inner
                .access_times
                .iter()
                .min_by_key(|(_, t)| **t)
                .map(|(k, _)| k.clone())
            {
                debug!(key = %oldest, "MemoryLayer::save: evicting oldest record");
                inner.storage.remove(&oldest);
                inner.access_times.remove(&oldest);
            }
        }

        inner.storage.insert(key.to_string(), record.clone());
        inner.access_times.insert(key.to_string(), Instant::now());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, StateError> {
        let mut inner = self.lock();
        if let Some(record) = inner.storage.get(key).cloned() {
            inner.access_times.insert(key.to_string(), Instant::now());
            return Ok(Some(record));
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        let mut inner = self.lock();
        inner.storage.remove(key);
        inner.access_times.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        let inner = self.lock();
        Ok(inner.storage.contains_key(key))
    }

    async fn keys(&self) -> Result<Vec<String>, StateError> {
        let inner = self.lock();
        Ok(inner.storage.keys().cloned().collect())
    }
}
