//! StateStore - layered session-state persistence
//!
//! Stores session records across an ordered chain of persistence layers,
//! fastest first (memory, then local file, then whatever the embedding
//! process plugs in). Writes always land in the fastest layer; slower
//! layers are synced opportunistically. Reads return the first hit.
//!
//! # Architecture
//!
//! ```text
//! .statestore/
//! ├── {key_hash}.json          # one record per session
//! └── snapshots/
//!     ├── {key_hash}_v10.json  # periodic version snapshots
//!     └── {key_hash}_v20.json
//! ```
//!
//! # Example
//!
//! ```ignore
//! use statestore::{StateManager, SessionRecord};
//!
//! let manager = StateManager::with_default_layers(".statestore")?;
//! let mut record = SessionRecord::new("user-42:chat-7");
//! record.set("current_step", serde_json::json!("awaiting_confirmation"));
//! manager.save(&mut record, false).await?;
//! let loaded = manager.load("user-42:chat-7").await;
//! ```

pub mod cli;
pub mod config;
mod layer;
mod manager;
mod record;

pub use layer::{FileLayer, MemoryLayer, StateError, StateLayer};
pub use manager::StateManager;
pub use record::SessionRecord;

/// Default throttle between fan-out syncs to slower layers, in seconds
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

/// Default capacity of the in-memory layer
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// A snapshot copy is kept every this many record versions
pub const DEFAULT_SNAPSHOT_EVERY: u64 = 10;

/// Current Unix time in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
