//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::Callbacks,
    circuit::{CircuitBreaker, CircuitContext},
    classifier::FailureClassifier,
    clock::{Clock, MonotonicClock},
    config::{Config, SlidingWindow},
    errors::ConfigError,
    window::SlidingWindowStats,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
///
/// Nothing is validated until [`build`](CircuitBuilder::build), which rejects
/// invalid thresholds instead of deferring the problem to call time.
pub struct CircuitBuilder {
    name: String,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            clock: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the failure rate threshold in percent (0-100)
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Set the slow-call rate threshold in percent (0-100)
    pub fn slow_call_rate_threshold(mut self, percent: f64) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    /// Calls lasting at least `duration` are recorded as slow
    pub fn slow_call_duration_threshold(mut self, duration: Duration) -> Self {
        self.config.slow_call_duration_threshold = duration;
        self
    }

    /// Compute rates over the last `size` calls
    pub fn count_window(mut self, size: usize) -> Self {
        self.config.sliding_window = SlidingWindow::Count(size);
        self
    }

    /// Compute rates over calls recorded within the trailing `duration`
    pub fn time_window(mut self, duration: Duration) -> Self {
        self.config.sliding_window = SlidingWindow::Time(duration);
        self
    }

    /// Set minimum number of calls before rates are evaluated
    pub fn minimum_calls(mut self, calls: usize) -> Self {
        self.config.minimum_number_of_calls = calls;
        self
    }

    /// How long the circuit stays open before trial calls
    pub fn wait_duration_in_open_state(mut self, duration: Duration) -> Self {
        self.config.wait_duration_in_open_state = duration;
        self
    }

    /// Size of the half-open trial batch
    pub fn permitted_calls_in_half_open_state(mut self, calls: usize) -> Self {
        self.config.permitted_calls_in_half_open_state = calls;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: wait * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Use a custom time source (defaults to [`MonotonicClock`])
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to filter which errors should trip the circuit
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use tripswitch::{CircuitBreaker, PredicateClassifier};
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only trip on slow errors
    ///         ctx.duration > Duration::from_secs(1)
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Replace every hook at once
    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Set callback for every short-circuited call
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_rejected = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        self.config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let window = Arc::new(SlidingWindowStats::new(&self.config, clock.clone()));

        let context = CircuitContext {
            name: self.name,
            config: self.config,
            window,
            clock,
            failure_classifier: self.failure_classifier,
        };

        Ok(CircuitBreaker::with_context_and_callbacks(
            context,
            self.callbacks,
        ))
    }
}
