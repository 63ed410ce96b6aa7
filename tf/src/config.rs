//! TaskFabric configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dlq::DlqConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::watchdog::WatchdogConfig;

/// Main TaskFabric configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Task orchestrator settings
    pub orchestrator: OrchestratorConfig,

    /// Watchdog settings
    pub watchdog: WatchdogConfig,

    /// Dead-letter queue settings
    pub dlq: DlqConfig,

    /// Session state store settings
    pub state: statestore::config::Config,
}

impl FabricConfig {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskfabric.yml
        let local_config = PathBuf::from(".taskfabric.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskfabric/taskfabric.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskfabric").join("taskfabric.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FabricConfig::default();
        assert_eq!(config.watchdog.stuck_threshold, 1.5);
        assert_eq!(config.dlq.sweep_interval_secs, 30);
        assert_eq!(config.orchestrator.default_timeout_secs, 30.0);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
watchdog:
  check_interval_secs: 2.0

dlq:
  sweep_interval_secs: 10
"#;
        let config: FabricConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.watchdog.check_interval_secs, 2.0);
        assert_eq!(config.watchdog.stuck_threshold, 1.5);
        assert_eq!(config.dlq.sweep_interval_secs, 10);
        assert_eq!(config.dlq.default_max_retries, 5);
        assert_eq!(config.orchestrator.history_limit, 200);
    }

    #[test]
    fn test_orchestrator_timeout_table_from_yaml() {
        let yaml = r#"
orchestrator:
  timeouts:
    webhook_delivery: 12.5
  default_timeout_secs: 20.0
"#;
        let config: FabricConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.orchestrator.timeout_for("webhook_delivery"),
            std::time::Duration::from_millis(12_500)
        );
        assert_eq!(
            config.orchestrator.timeout_for("unlisted"),
            std::time::Duration::from_secs(20)
        );
    }
}
