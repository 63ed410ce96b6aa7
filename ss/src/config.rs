//! Configuration for statestore

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the state store directory
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Seconds between fan-out syncs to slower layers
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Capacity of the in-memory layer
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Keep a snapshot copy every this many record versions
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("statestore")
}

fn default_sync_interval_secs() -> u64 {
    crate::DEFAULT_SYNC_INTERVAL_SECS
}

fn default_memory_capacity() -> usize {
    crate::DEFAULT_MEMORY_CAPACITY
}

fn default_snapshot_every() -> u64 {
    crate::DEFAULT_SNAPSHOT_EVERY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            sync_interval_secs: default_sync_interval_secs(),
            memory_capacity: default_memory_capacity(),
            snapshot_every: default_snapshot_every(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("statestore").join("config.yml")),
            Some(PathBuf::from("statestore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
