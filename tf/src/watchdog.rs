//! Watchdog - second line of timeout enforcement
//!
//! The orchestrator's own `await`-with-timeout bounds well-behaved
//! operations. Operations that ignore cooperative cancellation can leave
//! their task Running past any deadline; the watchdog sweeps the live
//! registry on a fixed interval and force-recovers anything past
//! `timeout * stuck_threshold`. It never cancels the underlying future -
//! it only stops waiting and frees the registry slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::now_ms;
use crate::orchestrator::TaskOrchestrator;

/// Watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds between registry sweeps
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: f64,

    /// A task is stuck once `elapsed > timeout * stuck_threshold`
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: f64,
}

fn default_check_interval_secs() -> f64 {
    5.0
}

fn default_stuck_threshold() -> f64 {
    1.5
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            stuck_threshold: default_stuck_threshold(),
        }
    }
}

impl WatchdogConfig {
    /// Sweep interval as a Duration
    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.check_interval_secs)
    }
}

/// Watchdog counters, for introspection
#[derive(Debug, Default, Clone, Serialize)]
pub struct WatchdogStats {
    pub checks_performed: u64,
    pub stuck_tasks_found: u64,
    pub recoveries_triggered: u64,
    /// Unix ms of the most recent sweep
    pub last_check_ms: Option<i64>,
    /// Unix ms the watchdog started
    pub started_at_ms: Option<i64>,
}

struct WatchdogInner {
    stats: WatchdogStats,
}

/// Background sweep over the orchestrator's live task registry
pub struct Watchdog {
    config: WatchdogConfig,
    orchestrator: Arc<TaskOrchestrator>,
    inner: Arc<std::sync::Mutex<WatchdogInner>>,
    running: AtomicBool,
    shutdown_tx: std::sync::Mutex<Option<watch::Sender<bool>>>,
    monitor_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, orchestrator: Arc<TaskOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
            inner: Arc::new(std::sync::Mutex::new(WatchdogInner {
                stats: WatchdogStats::default(),
            })),
            running: AtomicBool::new(false),
            shutdown_tx: std::sync::Mutex::new(None),
            monitor_task: std::sync::Mutex::new(None),
        }
    }

    /// Start the background monitor loop
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Watchdog already running");
            return;
        }

        {
            let mut inner = lock(&self.inner);
            inner.stats.started_at_ms = Some(now_ms());
        }

        let (tx, rx) = watch::channel(false);
        *self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);

        let handle = tokio::spawn(monitor_loop(
            self.config.clone(),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.inner),
            rx,
        ));
        *self
            .monitor_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        info!(
            interval_secs = self.config.check_interval_secs,
            stuck_threshold = self.config.stuck_threshold,
            "Watchdog started"
        );
    }

    /// Stop the background monitor loop
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
            .monitor_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Watchdog task ended abnormally");
            }
        }

        info!("Watchdog stopped");
    }

    /// Whether the monitor loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run a single sweep (useful for testing and manual checks)
    pub async fn check_once(&self) -> usize {
        check_health(&self.config, &self.orchestrator, &self.inner).await
    }

    /// Counter snapshot
    pub fn stats(&self) -> WatchdogStats {
        lock(&self.inner).stats.clone()
    }
}

fn lock(inner: &std::sync::Mutex<WatchdogInner>) -> std::sync::MutexGuard<'_, WatchdogInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn monitor_loop(
    config: WatchdogConfig,
    orchestrator: Arc<TaskOrchestrator>,
    inner: Arc<std::sync::Mutex<WatchdogInner>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Watchdog monitor loop started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(config.check_interval()) => {
                check_health(&config, &orchestrator, &inner).await;

                // Health log roughly once a minute at the default cadence
                let checks = lock(&inner).stats.checks_performed;
                if checks % 12 == 0 {
                    let health = orchestrator.health().await;
                    info!(
                        active = health.active_tasks,
                        completed = health.completed_tasks,
                        failed = health.failed_tasks,
                        recovered = health.recovered_tasks,
                        "System health"
                    );
                }
            }
        }
    }
    debug!("Watchdog monitor loop stopped");
}

/// One sweep: find stuck tasks and recover each; returns recoveries
async fn check_health(
    config: &WatchdogConfig,
    orchestrator: &Arc<TaskOrchestrator>,
    inner: &Arc<std::sync::Mutex<WatchdogInner>>,
) -> usize {
    {
        let mut guard = lock(inner);
        guard.stats.checks_performed += 1;
        guard.stats.last_check_ms = Some(now_ms());
    }

    let stuck = orchestrator.stuck_tasks(config.stuck_threshold).await;
    if stuck.is_empty() {
        return 0;
    }

    warn!(count = stuck.len(), "Watchdog found stuck task(s)");
    lock(inner).stats.stuck_tasks_found += stuck.len() as u64;

    let mut recovered = 0;
    for task in stuck {
        info!(
            task_id = %task.id,
            operation_type = %task.operation_type,
            elapsed_secs = task.elapsed().as_secs_f64(),
            timeout_secs = task.timeout.as_secs_f64(),
            "Recovering stuck task"
        );
        if orchestrator.recover_stuck_task(&task.id).await {
            recovered += 1;
        } else {
            error!(task_id = %task.id, "Stuck task vanished before recovery");
        }
    }

    lock(inner).stats.recoveries_triggered += recovered as u64;
    recovered
}
