//! Named breakers, one per protected dependency
//!
//! A registry is an ordinary value: create one at startup and hand it (or an
//! `Arc` of it) to whatever needs breakers. Tests build their own registries,
//! so no state leaks between them.

use crate::{
    callbacks::Callbacks,
    circuit::CircuitBreaker,
    clock::{Clock, MonotonicClock},
    config::{Config, RegistryConfig},
    errors::ConfigError,
    metrics::CircuitMetrics,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Lazily populated map from breaker name to breaker
#[derive(Debug)]
pub struct CircuitRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    callbacks: Callbacks,
}

impl CircuitRegistry {
    /// Empty registry using [`Config::default`] for every breaker
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
            config: RegistryConfig::default(),
            clock: Arc::new(MonotonicClock::new()),
            callbacks: Callbacks::new(),
        }
    }

    /// Empty registry with per-breaker configuration
    pub fn with_config(config: RegistryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Time source shared by every breaker created afterwards
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Hooks installed on every breaker created afterwards
    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Breaker for `name`, created from the registry configuration on first use
    pub fn get_or_create(&self, name: &str) -> Result<Arc<CircuitBreaker>, ConfigError> {
        let config = self.config.for_instance(name).clone();
        self.get_or_create_with(name, config)
    }

    /// Breaker for `name`, created with `config` on first use
    ///
    /// `config` is ignored when the breaker already exists. Creation happens
    /// under the map's entry lock, so racing first calls build one breaker.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: Config,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        match self.breakers.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let breaker = Arc::new(
                    CircuitBreaker::builder(name)
                        .config(config)
                        .clock(self.clock.clone())
                        .callbacks(self.callbacks.clone())
                        .build()?,
                );
                tracing::debug!(circuit = %name, "circuit breaker registered");
                entry.insert(Arc::clone(&breaker));
                Ok(breaker)
            }
        }
    }

    /// Existing breaker for `name`
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Reset the named breaker to Closed; `false` if it does not exist
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.all() {
            breaker.reset();
        }
    }

    /// Drop the named breaker; the next lookup creates a fresh one
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Metrics of every registered breaker, sorted by name
    pub fn metrics(&self) -> Vec<(String, CircuitMetrics)> {
        let mut metrics: Vec<(String, CircuitMetrics)> = self
            .all()
            .into_iter()
            .map(|breaker| (breaker.name().to_string(), breaker.metrics()))
            .collect();
        metrics.sort_by(|a, b| a.0.cmp(&b.0));
        metrics
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    // Collected first so no shard lock is held while breakers are used
    fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SlidingWindow;
    use std::collections::HashMap;
    use std::thread;

    fn small_config() -> Config {
        Config {
            sliding_window: SlidingWindow::Count(2),
            minimum_number_of_calls: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let registry = CircuitRegistry::new();

        let first = registry.get_or_create("reading_list").expect("valid config");
        let second = registry.get_or_create("reading_list").expect("valid config");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_existing_breaker_keeps_original_config() {
        let registry = CircuitRegistry::new();

        registry
            .get_or_create_with("api", small_config())
            .expect("valid config");
        let again = registry
            .get_or_create_with("api", Config::default())
            .expect("valid config");

        assert_eq!(again.config(), &small_config());
    }

    #[test]
    fn test_instance_config_overrides_default() {
        let mut instances = HashMap::new();
        instances.insert("reading_list".to_string(), small_config());
        let registry = CircuitRegistry::with_config(RegistryConfig {
            default: Config::default(),
            instances,
        })
        .expect("valid config");

        let reading_list = registry.get_or_create("reading_list").expect("valid config");
        let other = registry.get_or_create("other").expect("valid config");

        assert_eq!(reading_list.config(), &small_config());
        assert_eq!(other.config(), &Config::default());
    }

    #[test]
    fn test_invalid_config_is_not_registered() {
        let registry = CircuitRegistry::new();
        let config = Config {
            minimum_number_of_calls: 0,
            ..Default::default()
        };

        assert!(registry.get_or_create_with("broken", config).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_first_access_creates_one_breaker() {
        let registry = Arc::new(CircuitRegistry::new());
        let mut handles = vec![];

        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                registry.get_or_create("shared").expect("valid config")
            }));
        }

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(breakers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reset_and_remove() {
        let registry = CircuitRegistry::new().clock(Arc::new(ManualClock::new()));
        let breaker = registry
            .get_or_create_with("api", small_config())
            .expect("valid config");

        let _ = breaker.call(|| Err::<(), _>("error 1"));
        let _ = breaker.call(|| Err::<(), _>("error 2"));
        assert!(breaker.is_open());

        assert!(registry.reset("api"));
        assert!(breaker.is_closed());
        assert!(!registry.reset("missing"));

        let removed = registry.remove("api").expect("registered");
        assert!(Arc::ptr_eq(&removed, &breaker));
        assert!(registry.is_empty());

        let fresh = registry.get_or_create("api").expect("valid config");
        assert!(!Arc::ptr_eq(&fresh, &breaker));
    }

    #[test]
    fn test_metrics_and_names_sorted() {
        let registry = CircuitRegistry::new();
        registry.get_or_create("b").expect("valid config");
        registry.get_or_create("a").expect("valid config");

        assert_eq!(registry.names(), vec!["a", "b"]);

        let metrics = registry.metrics();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].0, "a");
        assert_eq!(metrics[0].1.total_calls(), 0);
    }

    #[test]
    fn test_shared_callbacks_apply_to_every_breaker() {
        use parking_lot::Mutex;

        let opened = Arc::new(Mutex::new(Vec::new()));
        let log = opened.clone();
        let mut callbacks = Callbacks::new();
        callbacks.on_open = Some(Arc::new(move |name| log.lock().push(name.to_string())));

        let registry = CircuitRegistry::new()
            .clock(Arc::new(ManualClock::new()))
            .callbacks(callbacks);

        for name in ["a", "b"] {
            let breaker = registry
                .get_or_create_with(name, small_config())
                .expect("valid config");
            let _ = breaker.call(|| Err::<(), _>("error"));
            let _ = breaker.call(|| Err::<(), _>("error"));
        }

        assert_eq!(*opened.lock(), vec!["a", "b"]);
    }
}
