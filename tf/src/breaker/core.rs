//! Circuit breaker state machine

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use super::config::BreakerConfig;
use crate::now_ms;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Failure threshold reached, calls rejected
    Open,
    /// Testing whether the dependency has recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Counters for one breaker
#[derive(Debug, Default, Clone, Serialize)]
pub struct BreakerStats {
    pub state_changes: u64,
    pub failures: u64,
    pub successes: u64,
    pub rejected: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Unix ms of the most recent failure
    pub last_failure_at: Option<i64>,
    /// Unix ms of the most recent success
    pub last_success_at: Option<i64>,
    /// Unix ms when the circuit last opened
    pub opened_at: Option<i64>,
    /// Unix ms when the circuit last closed
    pub closed_at: Option<i64>,
}

/// Full status snapshot for introspection
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub stats: BreakerStats,
    pub half_open_calls: u32,
}

/// Transition hook; errors are logged, never propagated
pub type StateChangeHook = Box<dyn Fn(CircuitState, CircuitState) -> eyre::Result<()> + Send + Sync>;

#[derive(Default)]
struct Hooks {
    on_open: Option<StateChangeHook>,
    on_close: Option<StateChangeHook>,
    on_state_change: Option<StateChangeHook>,
}

struct BreakerInner {
    state: CircuitState,
    stats: BreakerStats,
    half_open_calls: u32,
    /// Monotonic instant the circuit opened; present exactly when Open
    opened_at: Option<Instant>,
}

/// Per-dependency circuit breaker
///
/// The OPEN → HALF_OPEN transition is lazy: it happens on the first
/// permission check after the recovery timeout, not on a timer.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    hooks: Hooks,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                stats: BreakerStats::default(),
                half_open_calls: 0,
                opened_at: None,
            }),
            hooks: Hooks::default(),
        }
    }

    /// Attach a hook invoked when the circuit opens
    pub fn on_open(mut self, hook: StateChangeHook) -> Self {
        self.hooks.on_open = Some(hook);
        self
    }

    /// Attach a hook invoked when the circuit closes
    pub fn on_close(mut self, hook: StateChangeHook) -> Self {
        self.hooks.on_close = Some(hook);
        self
    }

    /// Attach a hook invoked on every state change
    pub fn on_state_change(mut self, hook: StateChangeHook) -> Self {
        self.hooks.on_state_change = Some(hook);
        self
    }

    /// The dependency name this breaker guards
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state (may perform the lazy OPEN → HALF_OPEN transition)
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check whether a call should be allowed through
    ///
    /// Handles state transitions: an open circuit whose recovery timeout
    /// has elapsed moves to half-open here, and half-open admits up to the
    /// probe budget.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => true,

            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed());
                if elapsed.is_some_and(|e| e >= self.config.recovery_timeout()) {
                    info!(name = %self.config.name, "Circuit transitioning to half-open");
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_calls = 1;
                    inner.stats.consecutive_successes = 0;
                    true
                } else {
                    inner.stats.rejected += 1;
                    false
                }
            }

            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    inner.stats.rejected += 1;
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.stats.successes += 1;
        inner.stats.consecutive_successes += 1;
        inner.stats.consecutive_failures = 0;
        inner.stats.last_success_at = Some(now_ms());

        if inner.state == CircuitState::HalfOpen
            && inner.stats.consecutive_successes >= self.config.success_threshold
        {
            info!(name = %self.config.name, "Circuit closing after successful probes");
            self.transition(&mut inner, CircuitState::Closed);
            inner.stats.closed_at = Some(now_ms());
            inner.opened_at = None;
            inner.half_open_calls = 0;
            self.run_hook(&self.hooks.on_close, CircuitState::HalfOpen, CircuitState::Closed);
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.stats.failures += 1;
        inner.stats.consecutive_failures += 1;
        inner.stats.consecutive_successes = 0;
        inner.stats.last_failure_at = Some(now_ms());

        match inner.state {
            CircuitState::Closed => {
                if inner.stats.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        name = %self.config.name,
                        failures = inner.stats.consecutive_failures,
                        "Circuit opening"
                    );
                    self.open_circuit(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while probing goes straight back to open
                warn!(name = %self.config.name, "Probe failed, circuit re-opening");
                self.open_circuit(&mut inner, CircuitState::HalfOpen);
            }
            CircuitState::Open => {}
        }
    }

    fn open_circuit(&self, inner: &mut BreakerInner, from: CircuitState) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(Instant::now());
        inner.stats.opened_at = Some(now_ms());
        self.run_hook(&self.hooks.on_open, from, CircuitState::Open);
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.stats.state_changes += 1;
        self.run_hook(&self.hooks.on_state_change, from, to);
    }

    fn run_hook(&self, hook: &Option<StateChangeHook>, from: CircuitState, to: CircuitState) {
        if let Some(hook) = hook {
            if let Err(e) = hook(from, to) {
                error!(name = %self.config.name, error = %e, "Circuit breaker hook failed");
            }
        }
    }

    /// Manually open the circuit, bypassing the counters
    pub fn force_open(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            warn!(name = %self.config.name, "Circuit manually opened");
            let from = inner.state;
            self.open_circuit(&mut inner, from);
        }
    }

    /// Manually close the circuit, bypassing the counters
    pub fn force_close(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(name = %self.config.name, "Circuit manually closed");
            let from = inner.state;
            self.transition(&mut inner, CircuitState::Closed);
            inner.stats.closed_at = Some(now_ms());
            inner.stats.consecutive_failures = 0;
            inner.opened_at = None;
            inner.half_open_calls = 0;
            self.run_hook(&self.hooks.on_close, from, CircuitState::Closed);
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> BreakerStats {
        self.lock().stats.clone()
    }

    /// Full status snapshot for introspection
    pub fn status(&self) -> BreakerStatus {
        let inner = self.lock();
        BreakerStatus {
            name: self.config.name.clone(),
            state: inner.state,
            stats: inner.stats.clone(),
            half_open_calls: inner.half_open_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn quick_breaker(failure_threshold: u32, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            name: "test".to_string(),
            failure_threshold,
            recovery_timeout_secs: recovery_ms as f64 / 1000.0,
            half_open_max_calls: 2,
            success_threshold: 2,
        })
    }

    #[test]
    fn test_starts_closed_and_allows_calls() {
        let breaker = quick_breaker(3, 1000);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_opens_at_failure_threshold() {
        let breaker = quick_breaker(3, 60_000);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let breaker = quick_breaker(3, 60_000);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        // Never hit 3 consecutive
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_lazy_half_open_transition() {
        let breaker = quick_breaker(1, 30);

        breaker.record_failure();
        assert!(!breaker.can_execute());

        std::thread::sleep(Duration::from_millis(50));

        // The next permission check performs the transition
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_probe_budget() {
        let breaker = quick_breaker(1, 10);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        // half_open_max_calls = 2: transition consumes the first probe slot
        assert!(breaker.can_execute());
        assert!(breaker.can_execute());
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = quick_breaker(1, 10);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(breaker.can_execute());
        breaker.record_success();
        // One success is below success_threshold = 2; a failure now re-opens
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let breaker = quick_breaker(1, 10);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(breaker.can_execute());
        breaker.record_success();
        assert!(breaker.can_execute());
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_force_open_and_close() {
        let breaker = quick_breaker(5, 60_000);

        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        breaker.force_close();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
        assert_eq!(breaker.stats().consecutive_failures, 0);
    }

    #[test]
    fn test_rejected_counter() {
        let breaker = quick_breaker(1, 60_000);
        breaker.record_failure();

        breaker.can_execute();
        breaker.can_execute();
        assert_eq!(breaker.stats().rejected, 2);
    }

    #[test]
    fn test_hooks_fire_and_errors_are_swallowed() {
        let opens = Arc::new(AtomicU32::new(0));
        let opens_clone = opens.clone();

        let breaker = quick_breaker(1, 60_000).on_open(Box::new(move |_, _| {
            opens_clone.fetch_add(1, Ordering::SeqCst);
            eyre::bail!("hook exploded")
        }));

        // The hook error must not reach us
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_snapshot() {
        let breaker = quick_breaker(2, 60_000);
        breaker.record_failure();
        breaker.record_failure();

        let status = breaker.status();
        assert_eq!(status.name, "test");
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.stats.failures, 2);
        assert!(status.stats.opened_at.is_some());
    }
}
