//! Persistence layers
//!
//! Each layer implements the same save/load/delete/exists/keys contract
//! and must tolerate the layers around it being absent or broken.

mod file;
mod memory;

pub use file::FileLayer;
pub use memory::MemoryLayer;

use async_trait::async_trait;
use thiserror::Error;

use crate::record::SessionRecord;

/// Errors from persistence layer operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Layer '{layer}' unavailable: {reason}")]
    Unavailable { layer: String, reason: String },
}

/// A single persistence layer in the chain
///
/// Implementations must be independently thread-safe; the manager never
/// holds a lock across a layer call.
#[async_trait]
pub trait StateLayer: Send + Sync {
    /// Short layer name for logging
    fn name(&self) -> &str;

    /// Persist a record under the given key
    async fn save(&self, key: &str, record: &SessionRecord) -> Result<(), StateError>;

    /// Load the record for a key, `None` if absent
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, StateError>;

    /// Remove the record for a key (absent keys are not an error)
    async fn delete(&self, key: &str) -> Result<(), StateError>;

    /// Check whether a record exists for a key
    async fn exists(&self, key: &str) -> Result<bool, StateError>;

    /// Enumerate all stored session ids
    async fn keys(&self) -> Result<Vec<String>, StateError>;
}
