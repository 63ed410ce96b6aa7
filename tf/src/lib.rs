//! TaskFabric - self-healing task orchestration fabric
//!
//! Lets a long-running service execute fallible, latency-variable
//! operations (model calls, document conversions, storage writes) with
//! four guarantees: no operation blocks its caller indefinitely, repeated
//! failures against one dependency never cascade into overall
//! unavailability, permanently failed operations are never silently
//! dropped, and session state survives process restarts.
//!
//! # Components
//!
//! - [`classifier`] - error -> recovery-decision classification
//! - [`breaker`] - per-dependency circuit breakers
//! - [`retry`] - exponential backoff retry execution
//! - [`dlq`] - durable dead-letter queue with scheduled retries
//! - [`orchestrator`] - timeout-bounded, tracked task execution
//! - [`watchdog`] - background stuck-task recovery
//! - [`fabric`] - the assembled facade with start/stop lifecycle
//!
//! Session persistence lives in the companion `statestore` crate and is
//! re-exported here for convenience.
//!
//! # Guarantees and their limits
//!
//! Timeouts are soft: the orchestrator stops waiting, it does not kill
//! the operation, so cancellation-deaf operations may run to completion
//! detached. Dead-letter delivery is at-least-once; handlers own
//! idempotency. All coordination is in-process - nothing here locks
//! across processes. Operations run on the cooperative scheduler;
//! CPU-bound sub-steps (text extraction, rendering) belong on
//! `tokio::task::spawn_blocking` so they never stall it.

pub mod breaker;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod dlq;
pub mod fabric;
pub mod notify;
pub mod orchestrator;
pub mod retry;
pub mod watchdog;

// Re-export commonly used types
pub use breaker::{BreakerConfig, BreakerStats, BreakerStatus, CircuitBreaker, CircuitBreakerSet, CircuitState};
pub use classifier::{ClassifiedError, ErrorCategory, ErrorClassifier, ErrorSeverity};
pub use config::FabricConfig;
pub use dlq::{DeadLetterItem, DeadLetterQueue, DlqConfig, DlqError, DlqHandler, DlqItemStatus, DlqStats};
pub use fabric::{Fabric, FabricStatus};
pub use notify::{LogNotifier, Notifier, TaskOwner};
pub use orchestrator::{
    OrchestratorConfig, OrchestratorError, OrchestratorHealth, TaskOrchestrator, TaskSnapshot, TaskStatus,
    TrackedTask,
};
pub use retry::{RetryError, RetryExecutor, RetryPolicy, RetryStats, backoff_delay};
pub use statestore::{SessionRecord, StateManager};
pub use watchdog::{Watchdog, WatchdogConfig, WatchdogStats};

/// Current Unix time in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
