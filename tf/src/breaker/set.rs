//! Named circuit breaker set
//!
//! Owns the breaker for every guarded dependency. Constructed once at
//! process start and passed by reference to whatever needs it; there is
//! no global registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::config::BreakerConfig;
use super::core::{BreakerStatus, CircuitBreaker};

/// Set of circuit breakers keyed by dependency name
pub struct CircuitBreakerSet {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerSet {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// A set pre-populated with the standard service presets
    pub fn with_presets() -> Self {
        let set = Self::new();
        for config in [
            BreakerConfig::ai_model(),
            BreakerConfig::database(),
            BreakerConfig::external_api(),
            BreakerConfig::file_service(),
            BreakerConfig::webhook(),
        ] {
            let name = config.name.clone();
            set.get_or_create(&name, Some(config));
        }
        set
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the breaker for a dependency, creating it on first use
    pub fn get_or_create(&self, name: &str, config: Option<BreakerConfig>) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(%name, "Creating circuit breaker");
                let config = config.unwrap_or_else(|| BreakerConfig::named(name));
                Arc::new(CircuitBreaker::new(config))
            })
            .clone()
    }

    /// Get an existing breaker by name
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().get(name).cloned()
    }

    /// Remove a breaker
    pub fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Status of every breaker, for introspection
    pub fn all_status(&self) -> Vec<BreakerStatus> {
        let mut statuses: Vec<_> = self.lock().values().map(|b| b.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Force every breaker closed
    pub fn reset_all(&self) {
        for breaker in self.lock().values() {
            breaker.force_close();
        }
    }
}

impl Default for CircuitBreakerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;

    #[test]
    fn test_get_or_create_reuses_instance() {
        let set = CircuitBreakerSet::new();
        let a = set.get_or_create("svc", None);
        let b = set.get_or_create("svc", None);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let set = CircuitBreakerSet::new();
        assert!(set.get("absent").is_none());
    }

    #[test]
    fn test_presets_registered() {
        let set = CircuitBreakerSet::with_presets();
        for name in ["ai_model", "database", "external_api", "file_service", "webhook"] {
            assert!(set.get(name).is_some(), "missing preset breaker {name}");
        }
    }

    #[test]
    fn test_breakers_do_not_contend() {
        // Opening one dependency's breaker leaves the others untouched
        let set = CircuitBreakerSet::with_presets();
        let ai = set.get("ai_model").unwrap();
        ai.force_open();

        assert_eq!(ai.state(), CircuitState::Open);
        assert_eq!(set.get("database").unwrap().state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset_all() {
        let set = CircuitBreakerSet::with_presets();
        set.get("ai_model").unwrap().force_open();
        set.get("webhook").unwrap().force_open();

        set.reset_all();

        for status in set.all_status() {
            assert_eq!(status.state, CircuitState::Closed);
        }
    }

    #[test]
    fn test_all_status_sorted() {
        let set = CircuitBreakerSet::with_presets();
        let names: Vec<_> = set.all_status().into_iter().map(|s| s.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
