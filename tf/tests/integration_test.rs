//! Integration tests for TaskFabric
//!
//! These tests verify end-to-end behavior across the fabric's components.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use statestore::{FileLayer, SessionRecord, StateLayer};
use taskfabric::config::FabricConfig;
use taskfabric::dlq::DlqHandler;
use taskfabric::notify::{Notifier, TaskOwner};
use taskfabric::orchestrator::{OrchestratorError, TaskStatus};
use taskfabric::{Fabric, LogNotifier, RetryError, RetryPolicy};

fn test_config(temp: &TempDir) -> FabricConfig {
    let mut config = FabricConfig::default();
    config.dlq.storage_path = temp.path().join("dlq");
    config.state.store_path = temp.path().join("state");
    config
        .orchestrator
        .timeouts
        .insert("quick".to_string(), 0.03);
    config
}

struct CountingNotifier {
    messages: std::sync::Mutex<Vec<String>>,
}

impl CountingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: std::sync::Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, _owner: &TaskOwner, message: &str) -> eyre::Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

struct FlakyHandler {
    attempts_until_success: u32,
    calls: std::sync::Mutex<u32>,
}

#[async_trait]
impl DlqHandler for FlakyHandler {
    async fn handle(&self, _payload: &Value) -> eyre::Result<bool> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        Ok(*calls > self.attempts_until_success)
    }
}

// =============================================================================
// Orchestrator through the fabric
// =============================================================================

#[tokio::test]
async fn test_fabric_timeout_then_fallback_recovers() {
    let temp = TempDir::new().unwrap();
    let notifier = CountingNotifier::new();
    let fabric = Fabric::new(test_config(&temp), notifier.clone()).unwrap();

    let owner = TaskOwner::new(1, 2);
    let result = fabric
        .orchestrator()
        .execute_with_fallback(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok("primary")
            },
            async { Ok("fallback") },
            owner,
            "quick",
            None,
        )
        .await
        .unwrap();

    assert_eq!(result, "fallback");
    assert_eq!(fabric.orchestrator().health().await.recovered_tasks, 1);
    // The owner was told about the timeout before the fallback ran
    assert_eq!(notifier.messages.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_fabric_timeout_without_fallback_reraises() {
    let temp = TempDir::new().unwrap();
    let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();

    let result: Result<(), _> = fabric
        .orchestrator()
        .execute_with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            TaskOwner::new(1, 2),
            "quick",
            None,
        )
        .await;

    let Err(OrchestratorError::Timeout { task_id, .. }) = result else {
        panic!("expected timeout");
    };
    assert_eq!(
        fabric.orchestrator().archived_status(&task_id).await,
        Some(TaskStatus::TimedOut)
    );
}

// =============================================================================
// Retry + breaker + classifier working together
// =============================================================================

#[tokio::test]
async fn test_retry_exhaustion_opens_breaker_then_fails_fast() {
    let temp = TempDir::new().unwrap();
    let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();

    let breaker = fabric.breakers().get_or_create(
        "flaky_service",
        Some(taskfabric::BreakerConfig {
            failure_threshold: 3,
            recovery_timeout_secs: 60.0,
            ..taskfabric::BreakerConfig::named("flaky_service")
        }),
    );

    let policy = RetryPolicy {
        max_attempts: 10,
        base_delay_secs: 0.001,
        max_delay_secs: 0.002,
        jitter: false,
        ..Default::default()
    };

    #[derive(Debug)]
    struct Downstream;
    impl std::fmt::Display for Downstream {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "service unavailable")
        }
    }
    impl std::error::Error for Downstream {}

    let result: Result<((), _), _> = fabric
        .retry()
        .run("call_flaky", &policy, Some(&breaker), || async { Err(Downstream) })
        .await;

    // The third failure opened the breaker; the fourth permission check
    // failed fast instead of burning the remaining budget
    assert!(matches!(result, Err(RetryError::CircuitOpen { .. })));
    assert_eq!(breaker.stats().failures, 3);

    // Subsequent calls against the same dependency skip straight to the
    // fast-fail
    let again: Result<((), _), RetryError<Downstream>> = fabric
        .retry()
        .run("call_flaky", &policy, Some(&breaker), || async { Ok(()) })
        .await;
    assert!(matches!(again, Err(RetryError::CircuitOpen { .. })));
}

// =============================================================================
// Dead-letter queue end to end
// =============================================================================

#[tokio::test]
async fn test_dlq_priority_order_and_eventual_success() {
    let temp = TempDir::new().unwrap();
    let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();
    let dlq = fabric.dlq();

    let handler = Arc::new(FlakyHandler {
        attempts_until_success: 0,
        calls: std::sync::Mutex::new(0),
    });
    dlq.register_handler("send_webhook", handler.clone());

    // Enqueue out of priority order
    for (priority, n) in [(5u8, 1), (1, 2), (3, 3)] {
        dlq.enqueue(
            "send_webhook",
            serde_json::json!({"n": n}),
            "delivery failed",
            None,
            priority,
            vec![],
        )
        .await;
    }

    let attempted = dlq.process_ready_items().await;
    assert_eq!(attempted, 3);
    assert_eq!(*handler.calls.lock().unwrap(), 3);

    let stats = dlq.stats().await;
    assert_eq!(stats.total_success, 3);
    assert_eq!(stats.status_breakdown.get("success"), Some(&3));
}

#[tokio::test]
async fn test_dlq_survives_restart_with_full_state() {
    let temp = TempDir::new().unwrap();

    let item_id = {
        let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();
        fabric
            .dlq()
            .enqueue(
                "store_invoice",
                serde_json::json!({"invoice": {"vendor": "Acme", "amount": 99.5}}),
                "database timeout",
                Some(7),
                2,
                vec!["billing".to_string()],
            )
            .await
    };

    // A new fabric over the same directories sees the item, fully intact
    let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();
    fabric.start().await.unwrap();

    let item = fabric.dlq().get_item(&item_id).await.unwrap();
    assert_eq!(item.operation_type, "store_invoice");
    assert_eq!(item.payload["invoice"]["vendor"], "Acme");
    assert_eq!(item.max_retries, 7);
    assert_eq!(item.priority, 2);
    assert_eq!(item.tags, vec!["billing".to_string()]);

    fabric.shutdown().await;
}

// =============================================================================
// Session state across the layer chain
// =============================================================================

#[tokio::test]
async fn test_session_state_survives_restart() {
    let temp = TempDir::new().unwrap();

    {
        let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();
        let mut record = SessionRecord::new("user-9:chat-4");
        record.set("current_step", serde_json::json!("awaiting_confirmation"));
        record.set(
            "pending_invoice",
            serde_json::json!({"vendor": "Acme", "amount": 120.0}),
        );
        fabric.state().save(&mut record, true).await.unwrap();
    }

    // Fresh process: the memory layer is empty, the file layer answers
    let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();
    let record = fabric.state().load("user-9:chat-4").await.unwrap();
    assert_eq!(record.get("current_step"), Some(&serde_json::json!("awaiting_confirmation")));
    assert_eq!(record.get("pending_invoice").unwrap()["amount"], 120.0);
}

#[tokio::test]
async fn test_state_load_prefers_fast_layer() {
    let temp = TempDir::new().unwrap();
    let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();

    let mut record = SessionRecord::new("hot-session");
    fabric.state().save(&mut record, true).await.unwrap();
    let synced_version = record.version;

    // Rapid second save lands only in memory (sync throttled)
    fabric.state().save(&mut record, false).await.unwrap();

    // The manager serves the newest version from memory
    let loaded = fabric.state().load("hot-session").await.unwrap();
    assert_eq!(loaded.version, record.version);

    // while the disk copy is still the throttled older one
    let disk = FileLayer::open(temp.path().join("state")).unwrap();
    assert_eq!(disk.load("hot-session").await.unwrap().unwrap().version, synced_version);
}

// =============================================================================
// Watchdog as second line of defense
// =============================================================================

#[tokio::test]
async fn test_watchdog_recovers_task_the_orchestrator_lost() {
    let temp = TempDir::new().unwrap();
    let notifier = CountingNotifier::new();
    let fabric = Fabric::new(test_config(&temp), notifier.clone()).unwrap();

    // Simulate an operation that ignored cancellation: the task sits
    // Running with no awaiting caller
    let task_id = fabric
        .orchestrator()
        .start_task(TaskOwner::new(1, 2), "quick", None)
        .await;

    tokio::time::sleep(Duration::from_millis(80)).await;

    let recovered = fabric.watchdog().check_once().await;
    assert_eq!(recovered, 1);
    assert_eq!(
        fabric.orchestrator().archived_status(&task_id).await,
        Some(TaskStatus::Failed)
    );
    // The owner heard about it without any caller involvement
    assert_eq!(notifier.messages.lock().unwrap().len(), 1);

    let status = fabric.status().await;
    assert_eq!(status.watchdog.recoveries_triggered, 1);
    assert_eq!(status.orchestrator.active_tasks, 0);
}
