//! Fabric facade
//!
//! One explicit instance of every recovery component, wired together and
//! owned by the embedding process. Construction is side-effect free;
//! `start`/`shutdown` bracket the background loops.
//!
//! The fabric never enqueues to the dead-letter queue on its own - when
//! an operation exhausts retries and fallbacks, deciding whether the
//! failure is worth preserving belongs to the caller, which has the
//! payload and the context.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use serde::Serialize;
use tracing::info;

use statestore::{FileLayer, MemoryLayer, StateManager};

use crate::breaker::{BreakerStatus, CircuitBreakerSet};
use crate::classifier::ErrorClassifier;
use crate::config::FabricConfig;
use crate::dlq::{DeadLetterQueue, DlqStats};
use crate::notify::Notifier;
use crate::orchestrator::{OrchestratorHealth, TaskOrchestrator};
use crate::retry::RetryExecutor;
use crate::watchdog::{Watchdog, WatchdogStats};
use crate::now_ms;

/// Combined introspection snapshot
#[derive(Debug, Serialize)]
pub struct FabricStatus {
    /// Unix milliseconds the snapshot was taken
    pub timestamp: i64,
    pub circuit_breakers: Vec<BreakerStatus>,
    pub orchestrator: OrchestratorHealth,
    pub dlq: DlqStats,
    pub watchdog: WatchdogStats,
}

/// The assembled self-healing fabric
pub struct Fabric {
    classifier: Arc<ErrorClassifier>,
    breakers: Arc<CircuitBreakerSet>,
    retry: RetryExecutor,
    state: Arc<StateManager>,
    dlq: Arc<DeadLetterQueue>,
    orchestrator: Arc<TaskOrchestrator>,
    watchdog: Watchdog,
}

impl Fabric {
    /// Assemble the fabric from configuration
    ///
    /// The notifier is whatever surface delivers user feedback; use
    /// [`crate::notify::LogNotifier`] when there is none.
    pub fn new(config: FabricConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let classifier = Arc::new(ErrorClassifier::new());
        let breakers = Arc::new(CircuitBreakerSet::with_presets());
        let retry = RetryExecutor::new(Arc::clone(&classifier));

        let mut state = StateManager::new().with_sync_interval(Duration::from_secs(config.state.sync_interval_secs));
        state.add_layer(Arc::new(MemoryLayer::with_capacity(config.state.memory_capacity)));
        state.add_layer(Arc::new(
            FileLayer::open(&config.state.store_path)
                .context("Failed to open state store")?
                .with_snapshot_every(config.state.snapshot_every),
        ));
        let state = Arc::new(state);

        let dlq = Arc::new(DeadLetterQueue::new(config.dlq.clone()).context("Failed to open dead-letter storage")?);
        let orchestrator = Arc::new(TaskOrchestrator::new(config.orchestrator.clone(), notifier));
        let watchdog = Watchdog::new(config.watchdog.clone(), Arc::clone(&orchestrator));

        Ok(Self {
            classifier,
            breakers,
            retry,
            state,
            dlq,
            orchestrator,
            watchdog,
        })
    }

    /// Load durable state and start the background loops
    pub async fn start(&self) -> Result<()> {
        self.dlq.load().await.context("Failed to load dead-letter items")?;
        self.dlq.start();
        self.watchdog.start();
        info!("Fabric started");
        Ok(())
    }

    /// Stop the background loops
    pub async fn shutdown(&self) {
        self.watchdog.stop().await;
        self.dlq.stop().await;
        info!("Fabric shut down");
    }

    /// Read-only introspection snapshot
    pub async fn status(&self) -> FabricStatus {
        FabricStatus {
            timestamp: now_ms(),
            circuit_breakers: self.breakers.all_status(),
            orchestrator: self.orchestrator.health().await,
            dlq: self.dlq.stats().await,
            watchdog: self.watchdog.stats(),
        }
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerSet> {
        &self.breakers
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn dlq(&self) -> &Arc<DeadLetterQueue> {
        &self.dlq
    }

    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.orchestrator
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> FabricConfig {
        let mut config = FabricConfig::default();
        config.dlq.storage_path = temp.path().join("dlq");
        config.state.store_path = temp.path().join("state");
        config
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let temp = TempDir::new().unwrap();
        let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();

        fabric.start().await.unwrap();
        assert!(fabric.dlq().is_running());
        assert!(fabric.watchdog().is_running());

        fabric.shutdown().await;
        assert!(!fabric.dlq().is_running());
        assert!(!fabric.watchdog().is_running());
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let temp = TempDir::new().unwrap();
        let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();

        let status = fabric.status().await;
        assert_eq!(status.circuit_breakers.len(), 5);
        assert_eq!(status.orchestrator.active_tasks, 0);
        assert_eq!(status.dlq.current_items, 0);

        // The whole snapshot serializes for whatever surface wants it
        let json = serde_json::to_value(&status).unwrap();
        assert!(json["circuit_breakers"].is_array());
    }

    #[tokio::test]
    async fn test_components_are_wired() {
        let temp = TempDir::new().unwrap();
        let fabric = Fabric::new(test_config(&temp), Arc::new(LogNotifier)).unwrap();

        // Breaker presets are reachable
        assert!(fabric.breakers().get("ai_model").is_some());

        // State store round-trips through the fabric's manager
        let mut record = statestore::SessionRecord::new("fabric-test");
        fabric.state().save(&mut record, true).await.unwrap();
        assert!(fabric.state().load("fabric-test").await.is_some());
    }
}
