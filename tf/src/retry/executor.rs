//! Retry executor

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::policy::RetryPolicy;
use crate::breaker::CircuitBreaker;
use crate::classifier::ErrorClassifier;

/// Terminal outcome of a retry run
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The attached circuit breaker rejected the call before an attempt
    /// was made
    #[error("Circuit breaker '{name}' is open for {operation}")]
    CircuitOpen { name: String, operation: String },

    /// An attempt exceeded the policy's per-attempt timeout and the
    /// budget ran out
    #[error("Operation {operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// The operation failed with a non-retryable error, or the attempt
    /// budget was exhausted; carries the original error
    #[error("Operation {operation} failed after {attempts} attempt(s): {source}")]
    Failed {
        operation: String,
        attempts: u32,
        source: E,
    },
}

/// Counters for one retry run
#[derive(Debug, Default, Clone)]
pub struct RetryStats {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub total_wait: Duration,
}

/// Executes operations under a retry policy
///
/// Holds the classifier consulted for default retryability verdicts; the
/// policy's explicit category sets win over it.
pub struct RetryExecutor {
    classifier: Arc<ErrorClassifier>,
}

impl RetryExecutor {
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self { classifier }
    }

    /// Run `operation` under `policy`, optionally guarded by a breaker
    ///
    /// The breaker is checked before every attempt; an open circuit fails
    /// fast without consuming an attempt or sleeping. Suspension happens
    /// only between attempts.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation_name: &str,
        policy: &RetryPolicy,
        breaker: Option<&CircuitBreaker>,
        mut operation: F,
    ) -> Result<(T, RetryStats), RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let mut stats = RetryStats::default();
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 0..max_attempts {
            if let Some(breaker) = breaker {
                if !breaker.can_execute() {
                    debug!(operation = operation_name, breaker = breaker.name(), "Fast-failing on open circuit");
                    return Err(RetryError::CircuitOpen {
                        name: breaker.name().to_string(),
                        operation: operation_name.to_string(),
                    });
                }
            }

            stats.attempts += 1;

            let outcome = match policy.timeout() {
                Some(timeout) => match tokio::time::timeout(timeout, operation()).await {
                    Ok(result) => result.map_err(AttemptFailure::Operation),
                    Err(_) => Err(AttemptFailure::Timeout(timeout)),
                },
                None => operation().await.map_err(AttemptFailure::Operation),
            };

            match outcome {
                Ok(value) => {
                    stats.successes += 1;
                    if let Some(breaker) = breaker {
                        breaker.record_success();
                    }
                    return Ok((value, stats));
                }
                Err(failure) => {
                    stats.failures += 1;
                    if let Some(breaker) = breaker {
                        breaker.record_failure();
                    }

                    let last_attempt = attempt + 1 >= max_attempts;
                    let retryable = match &failure {
                        AttemptFailure::Timeout(_) => true,
                        AttemptFailure::Operation(e) => self.is_retryable(e, policy, operation_name),
                    };

                    if !retryable || last_attempt {
                        if !retryable {
                            error!(
                                operation = operation_name,
                                attempt = attempt + 1,
                                "Non-retryable error, giving up"
                            );
                        } else {
                            error!(
                                operation = operation_name,
                                attempts = stats.attempts,
                                "All attempts exhausted"
                            );
                        }
                        return Err(match failure {
                            AttemptFailure::Timeout(timeout) => RetryError::Timeout {
                                operation: operation_name.to_string(),
                                timeout,
                            },
                            AttemptFailure::Operation(source) => RetryError::Failed {
                                operation: operation_name.to_string(),
                                attempts: stats.attempts,
                                source,
                            },
                        });
                    }

                    let delay = jittered_delay(policy, attempt);
                    stats.total_wait += delay;
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        unreachable!("retry loop returns on the last attempt")
    }

    fn is_retryable<E>(&self, error: &E, policy: &RetryPolicy, operation_name: &str) -> bool
    where
        E: StdError + Send + Sync + 'static,
    {
        let classified = self.classifier.classify(error, Some(operation_name));

        // Explicit policy sets win over the classifier's verdict
        if policy.non_retryable.contains(&classified.category) {
            return false;
        }
        if !policy.retryable.is_empty() {
            return policy.retryable.contains(&classified.category);
        }
        classified.retryable
    }
}

enum AttemptFailure<E> {
    Operation(E),
    Timeout(Duration),
}

/// Backoff delay for an attempt, perturbed when jitter is enabled
///
/// The jittered value stays within ±`jitter_max` of the unjittered delay
/// and is never negative.
fn jittered_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.delay_for_attempt(attempt).as_secs_f64();
    if !policy.jitter || policy.jitter_max <= 0.0 || base <= 0.0 {
        return Duration::from_secs_f64(base);
    }

    let offset: f64 = rand::rng().random_range(-policy.jitter_max..policy.jitter_max);
    Duration::from_secs_f64((base + base * offset).max(0.0))
}
