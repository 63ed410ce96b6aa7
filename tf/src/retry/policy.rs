//! Retry policies and the backoff formula

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classifier::ErrorCategory;

/// Configuration for one retry run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (must be >= 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry, in seconds
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,

    /// Cap on the computed backoff delay, in seconds
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,

    /// Exponential growth factor
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    /// Whether to perturb delays to decorrelate retry storms
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Jitter amplitude as a fraction of the unjittered delay
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,

    /// Optional per-attempt timeout, in seconds
    #[serde(default)]
    pub timeout_secs: Option<f64>,

    /// Categories never retried, wins over `retryable`
    #[serde(default)]
    pub non_retryable: Vec<ErrorCategory>,

    /// When non-empty, only these categories are retried
    #[serde(default)]
    pub retryable: Vec<ErrorCategory>,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_secs() -> f64 {
    1.0
}

fn default_max_delay_secs() -> f64 {
    60.0
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_jitter_max() -> f64 {
    0.5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
            jitter_max: default_jitter_max(),
            timeout_secs: None,
            non_retryable: Vec::new(),
            retryable: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Per-attempt timeout as a Duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }

    /// Unjittered backoff delay for a 0-indexed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay_secs, self.exponential_base, attempt, self.max_delay_secs)
    }

    /// For AI model API calls
    pub fn ai_model() -> Self {
        Self {
            max_attempts: 6,
            base_delay_secs: 1.0,
            max_delay_secs: 30.0,
            ..Default::default()
        }
    }

    /// For database operations: short delays, gentler growth
    pub fn database() -> Self {
        Self {
            max_attempts: 6,
            base_delay_secs: 0.5,
            max_delay_secs: 20.0,
            exponential_base: 1.5,
            ..Default::default()
        }
    }

    /// For network operations
    pub fn network() -> Self {
        Self {
            max_attempts: 6,
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
            ..Default::default()
        }
    }

    /// For file downloads
    pub fn file_download() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 2.0,
            max_delay_secs: 30.0,
            ..Default::default()
        }
    }

    /// For webhook deliveries: few attempts, long delays
    pub fn webhook() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 5.0,
            max_delay_secs: 60.0,
            ..Default::default()
        }
    }
}

/// The shared backoff formula: `min(base * exp^attempt, max)`
///
/// Monotonically non-decreasing in `attempt` up to the cap. Also used by
/// the dead-letter queue for scheduled retries.
pub fn backoff_delay(base_secs: f64, exponential_base: f64, attempt: u32, max_secs: f64) -> Duration {
    let raw = base_secs * exponential_base.powi(attempt.min(63) as i32);
    let capped = raw.min(max_secs).max(0.0);
    Duration::from_secs_f64(capped)
}
