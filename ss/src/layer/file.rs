//! File-based persistence layer
//!
//! One JSON file per session, named by a stable hash of the session id so
//! arbitrary ids never hit filesystem character limits. Writes go to a
//! temporary path first and are renamed over the target, so a reader never
//! observes a partially written record. Every `snapshot_every` versions a
//! copy is kept under `snapshots/` and consulted when the primary record
//! is unreadable.

use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{StateError, StateLayer};
use crate::DEFAULT_SNAPSHOT_EVERY;
use crate::record::SessionRecord;

/// Durable file layer, survives process restarts
pub struct FileLayer {
    base_path: PathBuf,
    snapshot_every: u64,
}

impl FileLayer {
    /// Open or create a file layer rooted at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(base_path.join("snapshots"))?;
        debug!(path = %base_path.display(), "Opened file state layer");
        Ok(Self {
            base_path,
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
        })
    }

    /// Override how often version snapshots are kept
    pub fn with_snapshot_every(mut self, every: u64) -> Self {
        self.snapshot_every = every.max(1);
        self
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", stable_hash(key)))
    }

    fn snapshot_dir(&self) -> PathBuf {
        self.base_path.join("snapshots")
    }

    /// Keep a periodic snapshot copy for crash-recovery read-repair
    fn snapshot_if_due(&self, key: &str, record: &SessionRecord) {
        if record.version % self.snapshot_every != 0 {
            return;
        }
        let snapshot_path = self
            .snapshot_dir()
            .join(format!("{}_v{}.json", stable_hash(key), record.version));
        if let Err(e) = fs::copy(self.record_path(key), &snapshot_path) {
            warn!(error = %e, key, "Failed to write state snapshot");
        } else {
            debug!(key, version = record.version, "Wrote state snapshot");
        }
    }

    /// Try the most recent snapshots when the primary record is unreadable
    fn load_from_snapshots(&self, key: &str) -> Option<SessionRecord> {
        let prefix = format!("{}_v", stable_hash(key));
        let mut candidates: Vec<PathBuf> = fs::read_dir(self.snapshot_dir())
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();

        candidates.sort_by_key(|p| {
            p.metadata()
                .and_then(|m| m.modified())
                .ok()
        });
        candidates.reverse();

        for snapshot in candidates.iter().take(3) {
            let Ok(content) = fs::read_to_string(snapshot) else {
                continue;
            };
            match serde_json::from_str::<SessionRecord>(&content) {
                Ok(record) => {
                    info!(key, snapshot = %snapshot.display(), "Recovered state from snapshot");
                    return Some(record);
                }
                Err(e) => {
                    warn!(error = %e, snapshot = %snapshot.display(), "Snapshot unreadable");
                }
            }
        }
        None
    }

    /// Remove record files older than `max_age_days` (by mtime)
    pub fn cleanup_old(&self, max_age_days: u64) -> Result<usize, StateError> {
        let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(max_age_days * 86_400);
        let mut removed = 0;

        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if modified < cutoff {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(error = %e, path = %path.display(), "Failed to remove old state file");
                } else {
                    removed += 1;
                }
            }
        }

        info!(removed, "Cleaned up old state files");
        Ok(removed)
    }
}

#[async_trait]
impl StateLayer for FileLayer {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(&self, key: &str, record: &SessionRecord) -> Result<(), StateError> {
        let path = self.record_path(key);
        let tmp_path = path.with_extension("tmp");

        let content = serde_json::to_string_pretty(record)?;
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &path)?;

        self.snapshot_if_due(key, record);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, StateError> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let readable = fs::read_to_string(&path)
            .map_err(StateError::from)
            .and_then(|content| serde_json::from_str::<SessionRecord>(&content).map_err(StateError::from));

        match readable {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(error = %e, key, "Primary state record unreadable, trying snapshots");
                Ok(self.load_from_snapshots(key))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        let path = self.record_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.record_path(key).exists())
    }

    async fn keys(&self) -> Result<Vec<String>, StateError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            // Session ids are recovered from record contents since file
            // names are hashes
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(record) = serde_json::from_str::<SessionRecord>(&content) {
                keys.push(record.session_id);
            }
        }
        Ok(keys)
    }
}

/// Stable, deterministic hash for filesystem-safe record names
fn stable_hash(key: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let layer = FileLayer::open(temp.path()).unwrap();

        let mut record = SessionRecord::new("user-1:chat-1");
        record.set("step", serde_json::json!("collecting"));
        layer.save("user-1:chat-1", &record).await.unwrap();

        let loaded = layer.load("user-1:chat-1").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let temp = TempDir::new().unwrap();
        let layer = FileLayer::open(temp.path()).unwrap();
        assert!(layer.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let temp = TempDir::new().unwrap();
        let layer = FileLayer::open(temp.path()).unwrap();

        layer.save("s", &SessionRecord::new("s")).await.unwrap();
        assert!(layer.exists("s").await.unwrap());

        layer.delete("s").await.unwrap();
        assert!(!layer.exists("s").await.unwrap());

        // Deleting again is not an error
        layer.delete("s").await.unwrap();
    }

    #[tokio::test]
    async fn test_no_partial_writes_left_behind() {
        let temp = TempDir::new().unwrap();
        let layer = FileLayer::open(temp.path()).unwrap();
        layer.save("s", &SessionRecord::new("s")).await.unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_recovery_after_corruption() {
        let temp = TempDir::new().unwrap();
        let layer = FileLayer::open(temp.path()).unwrap().with_snapshot_every(1);

        let mut record = SessionRecord::new("fragile");
        record.set("important", serde_json::json!(true));
        layer.save("fragile", &record).await.unwrap();

        // Corrupt the primary record
        let path = layer.record_path("fragile");
        fs::write(&path, "{ not json").unwrap();

        let recovered = layer.load("fragile").await.unwrap().unwrap();
        assert_eq!(recovered.session_id, "fragile");
        assert_eq!(recovered.get("important"), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_keys_recovers_session_ids() {
        let temp = TempDir::new().unwrap();
        let layer = FileLayer::open(temp.path()).unwrap();

        layer.save("alpha", &SessionRecord::new("alpha")).await.unwrap();
        layer.save("beta", &SessionRecord::new("beta")).await.unwrap();

        let mut keys = layer.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_stable_hash_is_deterministic() {
        assert_eq!(stable_hash("abc"), stable_hash("abc"));
        assert_ne!(stable_hash("abc"), stable_hash("abd"));
    }
}
