//! Circuit breaker configuration and presets

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Dependency name this breaker guards
    #[serde(default = "default_name")]
    pub name: String,

    /// Consecutive failures before opening
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before the next permission check
    /// moves it to half-open
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: f64,

    /// Probe calls admitted while half-open
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,

    /// Consecutive successes needed to close from half-open
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> f64 {
    30.0
}

fn default_half_open_max_calls() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl BreakerConfig {
    /// Config named after a dependency, with default thresholds
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Recovery timeout as a Duration
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recovery_timeout_secs)
    }

    /// For AI model APIs: trips fast, probes cautiously
    pub fn ai_model() -> Self {
        Self {
            name: "ai_model".to_string(),
            failure_threshold: 3,
            recovery_timeout_secs: 30.0,
            half_open_max_calls: 2,
            success_threshold: 1,
        }
    }

    /// For database connections: tolerant, recovers quickly
    pub fn database() -> Self {
        Self {
            name: "database".to_string(),
            failure_threshold: 5,
            recovery_timeout_secs: 10.0,
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }

    /// For external APIs
    pub fn external_api() -> Self {
        Self {
            name: "external_api".to_string(),
            failure_threshold: 5,
            recovery_timeout_secs: 60.0,
            half_open_max_calls: 2,
            success_threshold: 1,
        }
    }

    /// For file processing services
    pub fn file_service() -> Self {
        Self {
            name: "file_service".to_string(),
            failure_threshold: 3,
            recovery_timeout_secs: 20.0,
            half_open_max_calls: 2,
            success_threshold: 1,
        }
    }

    /// For webhook endpoints: slow to trip, very slow to probe
    pub fn webhook() -> Self {
        Self {
            name: "webhook".to_string(),
            failure_threshold: 10,
            recovery_timeout_secs: 120.0,
            half_open_max_calls: 1,
            success_threshold: 1,
        }
    }
}
