//! Dead-letter queue implementation

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::item::{DeadLetterItem, DlqItemStatus};
use crate::now_ms;
use crate::retry::backoff_delay;

/// Base delay for scheduled retries, in seconds
const RETRY_BASE_SECS: f64 = 60.0;

/// Cap on the scheduled retry delay, in seconds
const RETRY_MAX_SECS: f64 = 3600.0;

/// Errors from queue operations
#[derive(Debug, Error)]
pub enum DlqError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Item {id} is {status}, cannot {action}")]
    InvalidState {
        id: String,
        status: DlqItemStatus,
        action: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Handler invoked to re-attempt an operation type
///
/// Delivery is at-least-once: a crash between the handler succeeding and
/// the item's state being persisted means the handler runs again after
/// restart. Handlers are expected to be idempotent, or to tolerate
/// duplicate side effects at their own discretion.
#[async_trait]
pub trait DlqHandler: Send + Sync {
    /// Re-attempt the operation; `Ok(false)` and `Err` both count as
    /// failures
    async fn handle(&self, payload: &Value) -> eyre::Result<bool>;
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    /// Directory holding one JSON file per item
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Seconds between sweep passes
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Default retry budget for enqueued items
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Success/Discarded items older than this are purged by cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_storage_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskfabric")
        .join("dlq")
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_retention_days() -> u64 {
    30
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self::new(default_storage_path())
    }
}

impl DlqConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_max_retries: default_max_retries(),
            retention_days: default_retention_days(),
        }
    }

    /// Sweep interval as a Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Lifetime counters
#[derive(Debug, Default, Clone, Serialize)]
struct Totals {
    total_enqueued: u64,
    total_success: u64,
    total_failed: u64,
    total_discarded: u64,
}

/// Statistics snapshot for introspection
#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    pub total_enqueued: u64,
    pub total_success: u64,
    pub total_failed: u64,
    pub total_discarded: u64,
    pub current_items: usize,
    pub status_breakdown: HashMap<String, usize>,
    pub handlers_registered: Vec<String>,
}

/// Durable dead-letter queue with a background retry sweep
pub struct DeadLetterQueue {
    config: DlqConfig,
    items: Mutex<HashMap<String, DeadLetterItem>>,
    handlers: RwLock<HashMap<String, Arc<dyn DlqHandler>>>,
    totals: std::sync::Mutex<Totals>,
    running: AtomicBool,
    shutdown_tx: std::sync::Mutex<Option<watch::Sender<bool>>>,
    sweep_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DeadLetterQueue {
    /// Create a queue over the given storage directory
    pub fn new(config: DlqConfig) -> Result<Self, DlqError> {
        fs::create_dir_all(&config.storage_path)?;
        Ok(Self {
            config,
            items: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            totals: std::sync::Mutex::new(Totals::default()),
            running: AtomicBool::new(false),
            shutdown_tx: std::sync::Mutex::new(None),
            sweep_task: std::sync::Mutex::new(None),
        })
    }

    /// Load persisted items from disk
    ///
    /// Items caught mid-processing by a crash are returned to Pending so
    /// the sweep picks them up again (at-least-once delivery).
    pub async fn load(&self) -> Result<usize, DlqError> {
        let mut loaded = HashMap::new();

        for entry in fs::read_dir(&self.config.storage_path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match fs::read_to_string(&path).map_err(DlqError::from).and_then(|content| {
                serde_json::from_str::<DeadLetterItem>(&content).map_err(DlqError::from)
            }) {
                Ok(mut item) => {
                    if item.status == DlqItemStatus::Processing {
                        warn!(id = %item.id, "Item was mid-processing at shutdown, requeueing");
                        item.status = DlqItemStatus::Pending;
                        item.updated_at = now_ms();
                        self.persist(&item);
                    }
                    loaded.insert(item.id.clone(), item);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to load dead-letter item");
                }
            }
        }

        let count = loaded.len();
        *self.items.lock().await = loaded;
        info!(count, "Loaded dead-letter items");
        Ok(count)
    }

    /// Register the handler for an operation type
    pub fn register_handler(&self, operation_type: impl Into<String>, handler: Arc<dyn DlqHandler>) {
        let operation_type = operation_type.into();
        info!(%operation_type, "Registered dead-letter handler");
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(operation_type, handler);
    }

    fn handler_for(&self, operation_type: &str) -> Option<Arc<dyn DlqHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(operation_type)
            .cloned()
    }

    /// Add a failed operation to the queue, returning its id
    ///
    /// This is the system's fallback of last resort, so it does not fail:
    /// a persistence problem is logged and the item stays queued in
    /// memory.
    pub async fn enqueue(
        &self,
        operation_type: impl Into<String>,
        payload: Value,
        error_info: impl Into<String>,
        max_retries: Option<u32>,
        priority: u8,
        tags: Vec<String>,
    ) -> String {
        let item = DeadLetterItem::new(
            operation_type,
            payload,
            error_info,
            max_retries.unwrap_or(self.config.default_max_retries),
            priority,
            tags,
        );
        let id = item.id.clone();

        info!(%id, operation_type = %item.operation_type, priority = item.priority, "Enqueued failed operation");
        self.persist(&item);
        self.items.lock().await.insert(id.clone(), item);
        self.totals_lock().total_enqueued += 1;

        id
    }

    fn totals_lock(&self) -> std::sync::MutexGuard<'_, Totals> {
        self.totals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persist an item to its own file, atomically
    fn persist(&self, item: &DeadLetterItem) {
        let path = self.item_path(&item.id);
        let result = serde_json::to_string_pretty(item)
            .map_err(DlqError::from)
            .and_then(|content| {
                let tmp_path = path.with_extension("tmp");
                fs::write(&tmp_path, content)?;
                fs::rename(&tmp_path, &path)?;
                Ok(())
            });
        if let Err(e) = result {
            error!(id = %item.id, error = %e, "Failed to persist dead-letter item");
        }
    }

    fn item_path(&self, id: &str) -> PathBuf {
        self.config.storage_path.join(format!("{id}.json"))
    }

    /// One sweep pass: process every item that is due, in priority order
    ///
    /// Returns the number of items attempted. Exposed so tests and manual
    /// tooling can drive a pass without waiting for the interval.
    pub async fn process_ready_items(&self) -> usize {
        let ready_ids: Vec<String> = {
            let items = self.items.lock().await;
            let mut ready: Vec<&DeadLetterItem> =
                items.values().filter(|i| i.is_ready_for_retry()).collect();
            // Priority ascending (1 = highest), then oldest first
            ready.sort_by_key(|i| (i.priority, i.created_at));
            ready.iter().map(|i| i.id.clone()).collect()
        };

        let mut attempted = 0;
        for id in ready_ids {
            if self.process_item(&id, false).await {
                attempted += 1;
            }
        }
        attempted
    }

    /// Process one item through its registered handler
    ///
    /// Returns false if the item was no longer ready (processed by a
    /// competing path in the meantime). `force` bypasses the readiness
    /// check for manual retries; a Processing item is never claimed twice.
    async fn process_item(&self, id: &str, force: bool) -> bool {
        // Claim the item under the lock; a concurrent sweep or manual
        // retry sees Processing and leaves it alone
        let (operation_type, payload) = {
            let mut items = self.items.lock().await;
            let Some(item) = items.get_mut(id) else {
                return false;
            };
            let claimable = if force {
                item.status != DlqItemStatus::Processing
            } else {
                item.is_ready_for_retry()
            };
            if !claimable {
                debug!(%id, status = %item.status, "Skipping item no longer ready");
                return false;
            }
            item.mark_processing();
            self.persist(item);
            (item.operation_type.clone(), item.payload.clone())
        };

        let Some(handler) = self.handler_for(&operation_type) else {
            warn!(%id, %operation_type, "No handler registered, discarding item");
            let mut items = self.items.lock().await;
            if let Some(item) = items.get_mut(id) {
                item.mark_discarded("No handler registered");
                self.persist(item);
            }
            self.totals_lock().total_discarded += 1;
            return true;
        };

        // Handler runs outside the index lock
        let outcome = handler.handle(&payload).await;

        let mut items = self.items.lock().await;
        let Some(item) = items.get_mut(id) else {
            return true;
        };

        match outcome {
            Ok(true) => {
                info!(%id, %operation_type, "Dead-letter item processed successfully");
                item.mark_success();
                self.totals_lock().total_success += 1;
            }
            Ok(false) | Err(_) => {
                let error_text = match outcome {
                    Err(e) => e.to_string(),
                    _ => "handler returned false".to_string(),
                };
                item.last_error = Some(error_text.clone());

                if item.retry_count + 1 < item.max_retries {
                    // Same backoff formula as the retry executor, scaled
                    // to the queue's cadence
                    let delay =
                        backoff_delay(RETRY_BASE_SECS, 2.0, item.retry_count, RETRY_MAX_SECS).as_secs();
                    item.mark_retry(delay);
                    warn!(%id, retry_count = item.retry_count, delay_secs = delay, "Dead-letter item failed, retry scheduled");
                } else {
                    item.retry_count += 1;
                    item.mark_failed(error_text);
                    self.totals_lock().total_failed += 1;
                    error!(%id, "Dead-letter item permanently failed");
                }
            }
        }
        self.persist(item);
        true
    }

    /// Manually retry an item right now, resetting its budget
    pub async fn retry_item(&self, id: &str) -> Result<(), DlqError> {
        {
            let mut items = self.items.lock().await;
            let item = items.get_mut(id).ok_or_else(|| DlqError::NotFound(id.to_string()))?;
            if item.status == DlqItemStatus::Processing {
                return Err(DlqError::InvalidState {
                    id: id.to_string(),
                    status: item.status,
                    action: "retry",
                });
            }
            item.reset_for_retry();
            self.persist(item);
        }
        self.process_item(id, true).await;
        Ok(())
    }

    /// Reset an item's budget and schedule, without processing it
    ///
    /// Useful from operator tooling with no handlers registered; the
    /// running daemon's next sweep picks the item up.
    pub async fn requeue_item(&self, id: &str) -> Result<(), DlqError> {
        let mut items = self.items.lock().await;
        let item = items.get_mut(id).ok_or_else(|| DlqError::NotFound(id.to_string()))?;
        if item.status == DlqItemStatus::Processing {
            return Err(DlqError::InvalidState {
                id: id.to_string(),
                status: item.status,
                action: "requeue",
            });
        }
        item.reset_for_retry();
        self.persist(item);
        Ok(())
    }

    /// Manually discard an item with a reason
    pub async fn discard_item(&self, id: &str, reason: &str) -> Result<(), DlqError> {
        let mut items = self.items.lock().await;
        let item = items.get_mut(id).ok_or_else(|| DlqError::NotFound(id.to_string()))?;
        if item.status == DlqItemStatus::Processing {
            return Err(DlqError::InvalidState {
                id: id.to_string(),
                status: item.status,
                action: "discard",
            });
        }
        item.mark_discarded(reason);
        self.persist(item);
        self.totals_lock().total_discarded += 1;
        Ok(())
    }

    /// Purge Success/Discarded items older than the retention window
    pub async fn cleanup_old_items(&self, max_age_days: u64) -> usize {
        let cutoff = now_ms() - (max_age_days as i64) * 86_400_000;
        let mut items = self.items.lock().await;

        let stale: Vec<String> = items
            .values()
            .filter(|i| {
                matches!(i.status, DlqItemStatus::Success | DlqItemStatus::Discarded)
                    && i.updated_at < cutoff
            })
            .map(|i| i.id.clone())
            .collect();

        for id in &stale {
            items.remove(id);
            if let Err(e) = fs::remove_file(self.item_path(id)) {
                debug!(%id, error = %e, "Could not remove dead-letter file");
            }
        }

        info!(removed = stale.len(), "Cleaned up old dead-letter items");
        stale.len()
    }

    /// Get a copy of one item
    pub async fn get_item(&self, id: &str) -> Option<DeadLetterItem> {
        self.items.lock().await.get(id).cloned()
    }

    /// List items, optionally filtered, sorted by priority then age
    pub async fn list_items(
        &self,
        status: Option<DlqItemStatus>,
        operation_type: Option<&str>,
    ) -> Vec<DeadLetterItem> {
        let items = self.items.lock().await;
        let mut selected: Vec<DeadLetterItem> = items
            .values()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .filter(|i| operation_type.is_none_or(|t| i.operation_type == t))
            .cloned()
            .collect();
        selected.sort_by_key(|i| (i.priority, i.created_at));
        selected
    }

    /// Statistics snapshot
    pub async fn stats(&self) -> DlqStats {
        let items = self.items.lock().await;
        let mut status_breakdown: HashMap<String, usize> = HashMap::new();
        for item in items.values() {
            *status_breakdown.entry(item.status.to_string()).or_default() += 1;
        }

        let mut handlers_registered: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        handlers_registered.sort();

        let totals = self.totals_lock().clone();
        DlqStats {
            total_enqueued: totals.total_enqueued,
            total_success: totals.total_success,
            total_failed: totals.total_failed,
            total_discarded: totals.total_discarded,
            current_items: items.len(),
            status_breakdown,
            handlers_registered,
        }
    }

    /// Start the background retry sweep
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Dead-letter sweep already running");
            return;
        }

        let (tx, rx) = watch::channel(false);
        *self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);

        let queue = Arc::clone(self);
        let handle = tokio::spawn(sweep_loop(queue, rx));
        *self
            .sweep_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        info!(interval_secs = self.config.sweep_interval_secs, "Dead-letter sweep started");
    }

    /// Stop the background retry sweep
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }

        let handle = self
            .sweep_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dead-letter sweep task ended abnormally");
            }
        }

        info!("Dead-letter sweep stopped");
    }

    /// Whether the sweep loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn sweep_loop(queue: Arc<DeadLetterQueue>, mut shutdown: watch::Receiver<bool>) {
    debug!("Dead-letter sweep loop started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(queue.config.sweep_interval()) => {
                let attempted = queue.process_ready_items().await;
                if attempted > 0 {
                    debug!(attempted, "Sweep pass complete");
                }
            }
        }
    }
    debug!("Dead-letter sweep loop stopped");
}
