//! Orchestrator implementation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::task::{TaskSnapshot, TaskStatus, TrackedTask};
use crate::notify::{Notifier, TaskOwner, discard_notice_best_effort, notify_best_effort};

/// Errors surfaced to callers of the orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The operation exceeded its timeout (and any fallback also failed)
    #[error("Task {operation_type} timed out after {timeout:?}")]
    Timeout {
        task_id: String,
        operation_type: String,
        timeout: Duration,
    },

    /// The operation itself failed
    #[error("Task {operation_type} failed: {error}")]
    Failed {
        task_id: String,
        operation_type: String,
        error: eyre::Report,
    },
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Timeout per operation type, in seconds
    #[serde(default = "default_timeouts")]
    pub timeouts: HashMap<String, f64>,

    /// Timeout for operation types not in the table, in seconds
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,

    /// Terminal tasks retained for introspection
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Default retry budget recorded on new tasks
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

fn default_timeouts() -> HashMap<String, f64> {
    HashMap::from([
        // OCR can be slow
        ("document_processing".to_string(), 45.0),
        ("invoice_generation".to_string(), 30.0),
        ("ai_extraction".to_string(), 60.0),
        ("file_download".to_string(), 15.0),
    ])
}

fn default_timeout_secs() -> f64 {
    30.0
}

fn default_history_limit() -> usize {
    200
}

fn default_max_retries() -> u32 {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeouts: default_timeouts(),
            default_timeout_secs: default_timeout_secs(),
            history_limit: default_history_limit(),
            default_max_retries: default_max_retries(),
        }
    }
}

impl OrchestratorConfig {
    /// Timeout for an operation type, falling back to the default
    pub fn timeout_for(&self, operation_type: &str) -> Duration {
        let secs = self
            .timeouts
            .get(operation_type)
            .copied()
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs_f64(secs)
    }
}

/// Health snapshot for introspection
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorHealth {
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub timed_out_tasks: usize,
    pub recovered_tasks: usize,
    pub tasks: Vec<TaskSnapshot>,
}

struct OrchestratorInner {
    active: HashMap<String, TrackedTask>,
    history: VecDeque<TrackedTask>,
}

/// Central dispatcher for timeout-bounded, tracked operations
pub struct TaskOrchestrator {
    config: OrchestratorConfig,
    notifier: Arc<dyn Notifier>,
    inner: Mutex<OrchestratorInner>,
}

impl TaskOrchestrator {
    pub fn new(config: OrchestratorConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            notifier,
            inner: Mutex::new(OrchestratorInner {
                active: HashMap::new(),
                history: VecDeque::new(),
            }),
        }
    }

    /// Execute an operation bounded by its type's timeout
    ///
    /// On timeout the owner is notified and the timeout is returned; the
    /// underlying future is dropped, not force-cancelled, so operations
    /// that ignore cancellation may keep running detached.
    pub async fn execute_with_timeout<T, F>(
        &self,
        operation: F,
        owner: TaskOwner,
        operation_type: &str,
        notice_id: Option<i64>,
    ) -> Result<T, OrchestratorError>
    where
        F: Future<Output = eyre::Result<T>>,
    {
        self.execute_inner(operation, None::<F>, owner, operation_type, notice_id)
            .await
    }

    /// Execute an operation with a fallback invoked if it times out
    ///
    /// A successful fallback marks the task Recovered and returns its
    /// result; a failed fallback marks the task Failed and the original
    /// timeout is returned.
    pub async fn execute_with_fallback<T, F, Fb>(
        &self,
        operation: F,
        fallback: Fb,
        owner: TaskOwner,
        operation_type: &str,
        notice_id: Option<i64>,
    ) -> Result<T, OrchestratorError>
    where
        F: Future<Output = eyre::Result<T>>,
        Fb: Future<Output = eyre::Result<T>>,
    {
        self.execute_inner(operation, Some(fallback), owner, operation_type, notice_id)
            .await
    }

    async fn execute_inner<T, F, Fb>(
        &self,
        operation: F,
        fallback: Option<Fb>,
        owner: TaskOwner,
        operation_type: &str,
        notice_id: Option<i64>,
    ) -> Result<T, OrchestratorError>
    where
        F: Future<Output = eyre::Result<T>>,
        Fb: Future<Output = eyre::Result<T>>,
    {
        let timeout = self.config.timeout_for(operation_type);
        let task_id = self.start_task(owner, operation_type, notice_id).await;

        match tokio::time::timeout(timeout, operation).await {
            Ok(Ok(value)) => {
                self.finish_task(&task_id, TaskStatus::Completed, None).await;
                Ok(value)
            }

            Ok(Err(e)) => {
                error!(%task_id, operation_type, error = %e, "Task failed");
                self.finish_task(&task_id, TaskStatus::Failed, Some(e.to_string())).await;
                notify_best_effort(&*self.notifier, &owner, failure_message(operation_type)).await;
                Err(OrchestratorError::Failed {
                    task_id,
                    operation_type: operation_type.to_string(),
                    error: e,
                })
            }

            Err(_) => {
                warn!(%task_id, operation_type, ?timeout, "Task timed out");
                self.set_status(&task_id, TaskStatus::TimedOut).await;
                notify_best_effort(&*self.notifier, &owner, timeout_message(operation_type)).await;

                if let Some(fallback) = fallback {
                    info!(%task_id, "Attempting fallback");
                    match fallback.await {
                        Ok(value) => {
                            self.finish_task(&task_id, TaskStatus::Recovered, None).await;
                            return Ok(value);
                        }
                        Err(e) => {
                            error!(%task_id, error = %e, "Fallback failed");
                            self.finish_task(
                                &task_id,
                                TaskStatus::Failed,
                                Some(format!("timeout, then fallback failed: {e}")),
                            )
                            .await;
                        }
                    }
                } else {
                    self.finish_task(
                        &task_id,
                        TaskStatus::TimedOut,
                        Some(format!("timeout after {timeout:?}")),
                    )
                    .await;
                }

                Err(OrchestratorError::Timeout {
                    task_id,
                    operation_type: operation_type.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Insert a new Running task into the live registry
    pub async fn start_task(&self, owner: TaskOwner, operation_type: &str, notice_id: Option<i64>) -> String {
        let task = TrackedTask::new(
            owner,
            operation_type,
            self.config.timeout_for(operation_type),
            self.config.default_max_retries,
            notice_id,
        );
        let task_id = task.id.clone();

        let mut inner = self.inner.lock().await;
        inner.active.insert(task_id.clone(), task);
        info!(%task_id, operation_type, %owner, "Started task");
        task_id
    }

    /// Update a live task's status without removing it
    async fn set_status(&self, task_id: &str, status: TaskStatus) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.active.get_mut(task_id) {
            task.status = status;
        }
    }

    /// Move a task out of the live registry into history
    ///
    /// Unknown ids are ignored: a leaked operation completing after the
    /// watchdog already recovered its task must be a no-op.
    async fn finish_task(&self, task_id: &str, status: TaskStatus, error: Option<String>) {
        let mut inner = self.inner.lock().await;
        let Some(mut task) = inner.active.remove(task_id) else {
            debug!(%task_id, "Ignoring finish for unknown task");
            return;
        };

        task.status = status;
        task.error = error;
        debug!(%task_id, %status, elapsed_secs = task.elapsed().as_secs_f64(), "Task finished");

        inner.history.push_back(task);
        while inner.history.len() > self.config.history_limit {
            inner.history.pop_front();
        }
    }

    /// Live tasks past `timeout * threshold`, for the watchdog
    pub async fn stuck_tasks(&self, threshold: f64) -> Vec<TrackedTask> {
        let inner = self.inner.lock().await;
        inner
            .active
            .values()
            .filter(|t| t.is_stuck(threshold))
            .cloned()
            .collect()
    }

    /// Force-recover a stuck task: notify the owner, mark it Failed, and
    /// clean up its progress notice
    ///
    /// The underlying operation is not cancelled; it only loses its
    /// registry slot. Returns false if the task already finished.
    pub async fn recover_stuck_task(&self, task_id: &str) -> bool {
        let task = {
            let inner = self.inner.lock().await;
            inner.active.get(task_id).cloned()
        };
        let Some(task) = task else {
            return false;
        };

        info!(
            %task_id,
            operation_type = %task.operation_type,
            elapsed_secs = task.elapsed().as_secs_f64(),
            "Recovering stuck task"
        );

        notify_best_effort(&*self.notifier, &task.owner, timeout_message(&task.operation_type)).await;
        self.finish_task(task_id, TaskStatus::Failed, Some("watchdog recovery".to_string()))
            .await;

        if let Some(notice_id) = task.notice_id {
            discard_notice_best_effort(&*self.notifier, &task.owner, notice_id).await;
        }
        true
    }

    /// Number of live tasks
    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.active.len()
    }

    /// Terminal status of an archived task, if still in history
    pub async fn archived_status(&self, task_id: &str) -> Option<TaskStatus> {
        let inner = self.inner.lock().await;
        inner
            .history
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| t.status)
    }

    /// Health snapshot for introspection
    pub async fn health(&self) -> OrchestratorHealth {
        let inner = self.inner.lock().await;
        let count = |status: TaskStatus| inner.history.iter().filter(|t| t.status == status).count();

        OrchestratorHealth {
            active_tasks: inner.active.len(),
            completed_tasks: count(TaskStatus::Completed),
            failed_tasks: count(TaskStatus::Failed),
            timed_out_tasks: count(TaskStatus::TimedOut),
            recovered_tasks: count(TaskStatus::Recovered),
            tasks: inner.active.values().map(|t| t.snapshot()).collect(),
        }
    }
}

/// User-facing message for a timed-out operation type
fn timeout_message(operation_type: &str) -> &'static str {
    match operation_type {
        "document_processing" => {
            "I'm having trouble reading your document. It may be a complex \
             layout or a low-quality scan. I'll keep trying in the \
             background and let you know if it works out; you can also \
             enter the details manually."
        }
        "file_download" => {
            "Your file is taking longer to fetch than expected. I'm still \
             on it and will follow up shortly."
        }
        _ => {
            "This is taking longer than expected. I'm still working on it \
             and will notify you when done; you can cancel and try again \
             at any time."
        }
    }
}

/// User-facing message for a failed operation type
fn failure_message(operation_type: &str) -> &'static str {
    match operation_type {
        "document_processing" => {
            "I couldn't process that document. Try a clearer image or PDF, \
             or enter the details manually."
        }
        _ => "Something went wrong while processing your request. Please try again.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct CollectingNotifier {
        messages: StdMutex<Vec<String>>,
        discarded: StdMutex<Vec<i64>>,
    }

    impl CollectingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: StdMutex::new(Vec::new()),
                discarded: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Notifier for CollectingNotifier {
        async fn notify(&self, _owner: &TaskOwner, message: &str) -> eyre::Result<()> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }

        async fn discard_notice(&self, _owner: &TaskOwner, notice_id: i64) -> eyre::Result<()> {
            self.discarded.lock().unwrap().push(notice_id);
            Ok(())
        }
    }

    fn quick_config(timeout_ms: u64) -> OrchestratorConfig {
        OrchestratorConfig {
            timeouts: HashMap::from([("quick".to_string(), timeout_ms as f64 / 1000.0)]),
            default_timeout_secs: timeout_ms as f64 / 1000.0,
            ..Default::default()
        }
    }

    fn owner() -> TaskOwner {
        TaskOwner::new(100, 200)
    }

    #[tokio::test]
    async fn test_success_within_timeout() {
        let orchestrator = TaskOrchestrator::new(quick_config(1000), Arc::new(LogNotifier));

        let result = orchestrator
            .execute_with_timeout(async { Ok(7) }, owner(), "quick", None)
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(orchestrator.active_count().await, 0);

        let health = orchestrator.health().await;
        assert_eq!(health.completed_tasks, 1);
    }

    #[tokio::test]
    async fn test_timeout_without_fallback() {
        let notifier = CollectingNotifier::new();
        let orchestrator = TaskOrchestrator::new(quick_config(20), notifier.clone());

        let result: Result<(), _> = orchestrator
            .execute_with_timeout(
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                },
                owner(),
                "quick",
                None,
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));

        // Owner heard about it
        assert_eq!(notifier.messages.lock().unwrap().len(), 1);

        // Archived as TimedOut
        let OrchestratorError::Timeout { task_id, .. } = err else {
            unreachable!()
        };
        assert_eq!(
            orchestrator.archived_status(&task_id).await,
            Some(TaskStatus::TimedOut)
        );
    }

    #[tokio::test]
    async fn test_timeout_with_successful_fallback() {
        let notifier = CollectingNotifier::new();
        let orchestrator = TaskOrchestrator::new(quick_config(20), notifier.clone());

        let result = orchestrator
            .execute_with_fallback(
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok("primary")
                },
                async { Ok("fallback") },
                owner(),
                "quick",
                None,
            )
            .await
            .unwrap();

        assert_eq!(result, "fallback");

        let health = orchestrator.health().await;
        assert_eq!(health.recovered_tasks, 1);
        // Timeout feedback still went out before the fallback ran
        assert_eq!(notifier.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_with_failing_fallback() {
        let orchestrator = TaskOrchestrator::new(quick_config(20), Arc::new(LogNotifier));

        let result: Result<&str, _> = orchestrator
            .execute_with_fallback(
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok("primary")
                },
                async { eyre::bail!("fallback broke too") },
                owner(),
                "quick",
                None,
            )
            .await;

        // The original timeout is what comes back
        let err = result.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));

        let OrchestratorError::Timeout { task_id, .. } = err else {
            unreachable!()
        };
        assert_eq!(
            orchestrator.archived_status(&task_id).await,
            Some(TaskStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_operation_error_notifies_and_fails() {
        let notifier = CollectingNotifier::new();
        let orchestrator = TaskOrchestrator::new(quick_config(1000), notifier.clone());

        let result: Result<(), _> = orchestrator
            .execute_with_timeout(
                async { eyre::bail!("downstream exploded") },
                owner(),
                "quick",
                None,
            )
            .await;

        assert!(matches!(result, Err(OrchestratorError::Failed { .. })));
        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        // The raw error text never reaches the owner
        assert!(!messages[0].contains("downstream exploded"));
    }

    #[tokio::test]
    async fn test_stuck_detection_and_recovery() {
        let notifier = CollectingNotifier::new();
        let orchestrator = TaskOrchestrator::new(quick_config(10), notifier.clone());

        let task_id = orchestrator.start_task(owner(), "quick", Some(555)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stuck = orchestrator.stuck_tasks(1.5).await;
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, task_id);

        assert!(orchestrator.recover_stuck_task(&task_id).await);
        assert_eq!(orchestrator.active_count().await, 0);
        assert_eq!(
            orchestrator.archived_status(&task_id).await,
            Some(TaskStatus::Failed)
        );
        // The progress notice was cleaned up
        assert_eq!(*notifier.discarded.lock().unwrap(), vec![555]);

        // Recovering again is a no-op
        assert!(!orchestrator.recover_stuck_task(&task_id).await);
    }

    #[tokio::test]
    async fn test_late_completion_after_recovery_is_ignored() {
        let orchestrator = TaskOrchestrator::new(quick_config(10), Arc::new(LogNotifier));

        let task_id = orchestrator.start_task(owner(), "quick", None).await;
        orchestrator.recover_stuck_task(&task_id).await;

        // The leaked operation "completes" later; nothing changes
        orchestrator.finish_task(&task_id, TaskStatus::Completed, None).await;
        assert_eq!(
            orchestrator.archived_status(&task_id).await,
            Some(TaskStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = OrchestratorConfig {
            history_limit: 3,
            ..quick_config(1000)
        };
        let orchestrator = TaskOrchestrator::new(config, Arc::new(LogNotifier));

        for _ in 0..5 {
            orchestrator
                .execute_with_timeout(async { Ok(()) }, owner(), "quick", None)
                .await
                .unwrap();
        }

        let health = orchestrator.health().await;
        assert_eq!(health.completed_tasks, 3);
    }

    #[test]
    fn test_timeout_table_fallback() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.timeout_for("document_processing"), Duration::from_secs(45));
        assert_eq!(config.timeout_for("never_heard_of_it"), Duration::from_secs(30));
    }
}
