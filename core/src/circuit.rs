//! Circuit breaker implementation using state machines
//!
//! The breaker cycles Closed → Open → HalfOpen → (Closed | Open) for as long
//! as it lives. The Open → HalfOpen move is evaluated lazily when a call
//! arrives; no timer runs in the background.

use crate::{
    callbacks::Callbacks,
    classifier::{FailureClassifier, FailureContext},
    clock::{Clock, MonotonicClock},
    config::Config,
    errors::{CircuitError, ConfigError},
    fallback::{Fallback, FallbackContext, FallbackReason, Rejection},
    metrics::{CallCounters, CircuitMetrics},
    permit::CallPermit,
    window::{CallOutcome, SlidingWindowStats, WindowSample},
};
use parking_lot::Mutex;
use state_machines::state_machine;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through and outcomes are recorded
    Closed,
    /// Calls are rejected without running
    Open,
    /// A limited batch of trial calls is let through
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }

    /// Map a state name reported by the generated `DynamicCircuit`
    ///
    /// The macro only produces the names of the states declared below.
    fn from_name(name: &str) -> Self {
        match name {
            "Closed" => CircuitState::Closed,
            "Open" => CircuitState::Open,
            "HalfOpen" => CircuitState::HalfOpen,
            other => unreachable!("state machine reported undeclared state '{other}'"),
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub window: Arc<SlidingWindowStats>,
    pub clock: Arc<dyn Clock>,
    pub failure_classifier: Option<Arc<dyn FailureClassifier>>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        let config = Config::default();
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        Self {
            name: String::new(),
            window: Arc::new(SlidingWindowStats::new(&config, clock.clone())),
            config,
            clock,
            failure_classifier: None,
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("window", &self.window)
            .field("clock", &self.clock)
            .field(
                "failure_classifier",
                &self
                    .failure_classifier
                    .as_ref()
                    .map(|_| "<dyn FailureClassifier>"),
            )
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: Duration,
    /// Wait before the next trial, jitter already applied
    pub wait: Duration,
}

impl OpenData {
    fn remaining(&self, now: Duration) -> Duration {
        (self.opened_at + self.wait).saturating_sub(now)
    }
}

/// Trial batch bookkeeping for the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    /// Trials let through so far (in flight + completed)
    pub admitted: usize,
    pub completed: usize,
    pub failures: usize,
    pub slow_calls: usize,
}

impl HalfOpenData {
    /// `None` until the whole batch has completed, then whether it breached
    fn verdict(&self, config: &Config) -> Option<bool> {
        if self.completed < config.permitted_calls_in_half_open_state || self.completed == 0 {
            return None;
        }
        let total = self.completed as f64;
        Some(config.is_breached(
            self.failures as f64 * 100.0 / total,
            self.slow_calls as f64 * 100.0 / total,
        ))
    }
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,  // Enable dynamic mode for runtime state transitions

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Circuit<Closed> {
    /// Either rate breaches its threshold once the window holds enough calls
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        let snapshot = ctx.window.snapshot();
        match (snapshot.failure_rate(), snapshot.slow_call_rate()) {
            (Some(failure_rate), Some(slow_call_rate)) => {
                ctx.config.is_breached(failure_rate, slow_call_rate)
            }
            _ => false,
        }
    }
}

impl Circuit<HalfOpen> {
    /// The completed trial batch breached a threshold
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .and_then(|trials| trials.verdict(&ctx.config))
            .unwrap_or(false)
    }

    /// The completed trial batch stayed below both thresholds
    fn should_close(&self, ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .and_then(|trials| trials.verdict(&ctx.config))
            .is_some_and(|breached| !breached)
    }
}

impl Circuit<Open> {
    /// Check if the open wait has elapsed for Open -> HalfOpen transition
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        self.state_data_open()
            .is_some_and(|data| data.remaining(ctx.clock.now()).is_zero())
    }
}

/// A state change, announced once the lock is released
#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
    failure_rate: Option<f64>,
    slow_call_rate: Option<f64>,
}

impl Transition {
    fn new(from: CircuitState, to: CircuitState) -> Self {
        Self {
            from,
            to,
            failure_rate: None,
            slow_call_rate: None,
        }
    }
}

/// Mutable per-breaker state, guarded by one lock
struct CircuitCore {
    machine: DynamicCircuit,
    /// Bumped on every state entry; admissions from an older epoch are stale
    epoch: u64,
    counters: CallCounters,
}

impl CircuitCore {
    fn state(&self) -> CircuitState {
        CircuitState::from_name(self.machine.current_state())
    }
}

/// Circuit breaker public API
///
/// All methods take `&self`; share a breaker between threads or tasks with an
/// `Arc`. Admission and outcome recording are serialized by an internal lock
/// that is never held while the protected operation runs.
pub struct CircuitBreaker {
    context: CircuitContext,
    callbacks: Callbacks,
    core: Mutex<CircuitCore>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        Self::builder(name).config(config).build()
    }

    /// Create a circuit breaker with custom context and callbacks (used by builder)
    pub(crate) fn with_context_and_callbacks(
        context: CircuitContext,
        callbacks: Callbacks,
    ) -> Self {
        let machine = DynamicCircuit::new(context.clone());

        Self {
            core: Mutex::new(CircuitCore {
                machine,
                epoch: 0,
                counters: CallCounters::default(),
            }),
            context,
            callbacks,
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.context.clock.as_ref()
    }

    /// Ask for permission to run one call
    ///
    /// Settle the returned permit with the call's outcome. This is the
    /// building block behind [`call`](Self::call) for callers that cannot
    /// express their operation as a closure.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, Rejection> {
        let mut transition = None;

        let admission = {
            let mut guard = self.core.lock();
            let core = &mut *guard;

            // Check for timeout-based Open -> HalfOpen transition
            if core.state() == CircuitState::Open
                && core.machine.handle(CircuitEvent::AttemptReset).is_ok()
            {
                core.epoch += 1;
                self.context.window.reset();
                transition = Some(Transition::new(
                    CircuitState::Open,
                    CircuitState::HalfOpen,
                ));
            }

            match core.state() {
                CircuitState::Closed => Ok((core.epoch, CircuitState::Closed)),
                CircuitState::HalfOpen => {
                    let permitted = self.context.config.permitted_calls_in_half_open_state;
                    let has_slot = core
                        .machine
                        .half_open_data_mut()
                        .map(|trials| {
                            let free = trials.admitted < permitted;
                            if free {
                                trials.admitted += 1;
                            }
                            free
                        })
                        .unwrap_or(false);

                    if has_slot {
                        Ok((core.epoch, CircuitState::HalfOpen))
                    } else {
                        core.counters.tally(CallOutcome::Rejected);
                        Err(Rejection::HalfOpenLimitReached { permitted })
                    }
                }
                CircuitState::Open => {
                    let now = self.context.clock.now();
                    let (opened_at, remaining) = core
                        .machine
                        .open_data()
                        .map(|data| (data.opened_at, data.remaining(now)))
                        .unwrap_or_default();
                    core.counters.tally(CallOutcome::Rejected);
                    Err(Rejection::Open {
                        opened_at,
                        remaining,
                    })
                }
            }
        };

        if let Some(transition) = transition {
            self.announce(transition);
        }

        match admission {
            Ok((epoch, state)) => Ok(CallPermit::new(self, epoch, state)),
            Err(rejection) => {
                tracing::debug!(circuit = %self.context.name, ?rejection, "call rejected");
                self.callbacks.trigger_rejected(&self.context.name);
                Err(rejection)
            }
        }
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Rejections and operation errors are returned as [`CircuitError`].
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        let permit = self
            .try_acquire()
            .map_err(|rejection| self.rejection_error(rejection))?;

        permit.record_result(f()).map_err(CircuitError::Execution)
    }

    /// Execute an operation, recovering rejections and failures with `fallback`
    ///
    /// The fallback runs at most once and never re-enters the operation. Only
    /// a failing fallback reaches the caller, as [`CircuitError::Fallback`].
    pub fn call_with_fallback<T, E, F, FB>(&self, f: F, fallback: FB) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        FB: Fallback<T, E>,
        E: 'static,
    {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => return self.recover_rejected(fallback, rejection),
        };

        let state = permit.state();
        match permit.record_result(f()) {
            Ok(val) => Ok(val),
            Err(e) => self.recover_in(fallback, state, FallbackReason::Failed(e)),
        }
    }

    /// Async variant of [`call`](Self::call)
    ///
    /// If the returned future is dropped while the operation is pending, the
    /// call is recorded as a cancellation failure.
    pub async fn call_async<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let permit = self
            .try_acquire()
            .map_err(|rejection| self.rejection_error(rejection))?;

        let result = f().await;
        permit.record_result(result).map_err(CircuitError::Execution)
    }

    /// Async variant of [`call_with_fallback`](Self::call_with_fallback)
    pub async fn call_async_with_fallback<T, E, F, Fut, FB>(
        &self,
        f: F,
        fallback: FB,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: Fallback<T, E>,
        E: 'static,
    {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => return self.recover_rejected(fallback, rejection),
        };

        let state = permit.state();
        let result = f().await;
        match permit.record_result(result) {
            Ok(val) => Ok(val),
            Err(e) => self.recover_in(fallback, state, FallbackReason::Failed(e)),
        }
    }

    /// Current state
    ///
    /// An Open circuit whose wait has elapsed still reports Open until the
    /// next call attempt moves it to HalfOpen.
    pub fn state(&self) -> CircuitState {
        self.core.lock().state()
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Failure percentage of the current window, `None` below the minimum calls
    pub fn failure_rate(&self) -> Option<f64> {
        self.context.window.failure_rate()
    }

    /// Slow-call percentage of the current window, `None` below the minimum calls
    pub fn slow_call_rate(&self) -> Option<f64> {
        self.context.window.slow_call_rate()
    }

    /// Newest window samples, oldest first
    pub fn recent_samples(&self, limit: usize) -> Vec<WindowSample> {
        self.context.window.recent_samples(limit)
    }

    /// Snapshot for metrics export
    pub fn metrics(&self) -> CircuitMetrics {
        let core = self.core.lock();
        let snapshot = self.context.window.snapshot();
        CircuitMetrics::new(core.state(), snapshot, &core.counters)
    }

    /// Clear all samples and counters and return to the Closed state
    ///
    /// Calls admitted before the reset still record their outcome in the
    /// lifetime counters, but no longer affect the window.
    pub fn reset(&self) {
        let from = {
            let mut core = self.core.lock();
            let from = core.state();
            // Recreate machine in Closed state
            core.machine = DynamicCircuit::new(self.context.clone());
            core.epoch += 1;
            core.counters = CallCounters::default();
            self.context.window.reset();
            from
        };

        tracing::info!(circuit = %self.context.name, from = %from, "circuit reset");
        if from != CircuitState::Closed {
            self.callbacks
                .trigger_transition(&self.context.name, CircuitState::Closed);
        }
    }

    /// Record the outcome of a call admitted in `epoch` and re-evaluate
    pub(crate) fn complete(&self, epoch: u64, outcome: CallOutcome) {
        let transition = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            core.counters.tally(outcome);

            if epoch != core.epoch {
                tracing::trace!(
                    circuit = %self.context.name,
                    ?outcome,
                    admitted_epoch = epoch,
                    current_epoch = core.epoch,
                    "outcome arrived after its state ended"
                );
                None
            } else {
                self.context.window.record(outcome);
                tracing::trace!(circuit = %self.context.name, ?outcome, "outcome recorded");
                self.evaluate(core, outcome)
            }
        };

        if let Some(transition) = transition {
            self.announce(transition);
        }
    }

    fn evaluate(&self, core: &mut CircuitCore, outcome: CallOutcome) -> Option<Transition> {
        match core.state() {
            CircuitState::Closed => {
                if core.machine.handle(CircuitEvent::Trip).is_ok() {
                    Some(self.mark_open(core, CircuitState::Closed))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if let Some(trials) = core.machine.half_open_data_mut() {
                    trials.completed += 1;
                    match outcome {
                        CallOutcome::Failure(_) => trials.failures += 1,
                        CallOutcome::Slow(_) => trials.slow_calls += 1,
                        _ => {}
                    }
                }

                if core.machine.handle(CircuitEvent::Trip).is_ok() {
                    Some(self.mark_open(core, CircuitState::HalfOpen))
                } else if core.machine.handle(CircuitEvent::Close).is_ok() {
                    core.epoch += 1;
                    self.context.window.reset();
                    Some(Transition::new(CircuitState::HalfOpen, CircuitState::Closed))
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    /// Apply Open-state bookkeeping (timestamp, wait, fresh window)
    fn mark_open(&self, core: &mut CircuitCore, from: CircuitState) -> Transition {
        let snapshot = self.context.window.snapshot();
        let wait = self.open_wait();

        if let Some(data) = core.machine.open_data_mut() {
            data.opened_at = self.context.clock.now();
            data.wait = wait;
        }
        core.epoch += 1;
        self.context.window.reset();

        Transition {
            from,
            to: CircuitState::Open,
            failure_rate: snapshot.failure_rate(),
            slow_call_rate: snapshot.slow_call_rate(),
        }
    }

    /// Open wait for this opening, with jitter applied via chrono-machines
    fn open_wait(&self) -> Duration {
        let config = &self.context.config;
        if config.jitter_factor <= 0.0 {
            return config.wait_duration_in_open_state;
        }

        let base_ms =
            u64::try_from(config.wait_duration_in_open_state.as_millis()).unwrap_or(u64::MAX);
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: base_ms,
            multiplier: 1.0,
            max_delay_ms: base_ms,
        };
        Duration::from_millis(policy.calculate_delay(1, config.jitter_factor))
    }

    fn announce(&self, transition: Transition) {
        let name = &self.context.name;
        if transition.to == CircuitState::Open {
            tracing::warn!(
                circuit = %name,
                from = %transition.from,
                failure_rate = ?transition.failure_rate,
                slow_call_rate = ?transition.slow_call_rate,
                "circuit opened"
            );
        } else {
            tracing::info!(
                circuit = %name,
                from = %transition.from,
                to = %transition.to,
                "circuit state transition"
            );
        }
        self.callbacks.trigger_transition(name, transition.to);
    }

    pub(crate) fn classify_success(&self, elapsed: Duration) -> CallOutcome {
        if elapsed >= self.context.config.slow_call_duration_threshold {
            CallOutcome::Slow(elapsed)
        } else {
            CallOutcome::Success
        }
    }

    /// Check if this error should trip the circuit using failure classifier
    pub(crate) fn counts_as_failure<E: 'static>(&self, error: &E, duration: Duration) -> bool {
        match &self.context.failure_classifier {
            Some(classifier) => classifier.should_trip(&FailureContext {
                circuit_name: &self.context.name,
                error: error as &dyn std::any::Any,
                duration,
            }),
            // No classifier - default behavior is to trip on all errors
            None => true,
        }
    }

    fn rejection_error<E>(&self, rejection: Rejection) -> CircuitError<E> {
        match rejection {
            Rejection::Open {
                opened_at,
                remaining,
            } => CircuitError::Open {
                circuit: self.context.name.clone(),
                opened_at,
                remaining,
            },
            Rejection::HalfOpenLimitReached { permitted } => CircuitError::HalfOpenLimitReached {
                circuit: self.context.name.clone(),
                permitted,
            },
        }
    }

    fn recover_rejected<T, E, FB: Fallback<T, E>>(
        &self,
        fallback: FB,
        rejection: Rejection,
    ) -> Result<T, CircuitError<E>> {
        self.recover_in(fallback, rejection.state(), FallbackReason::Rejected(rejection))
    }

    fn recover_in<T, E, FB: Fallback<T, E>>(
        &self,
        fallback: FB,
        state: CircuitState,
        reason: FallbackReason<E>,
    ) -> Result<T, CircuitError<E>> {
        fallback
            .recover(FallbackContext {
                circuit_name: self.context.name.clone(),
                state,
                reason,
            })
            .map_err(CircuitError::Fallback)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state())
            .field("config", &self.context.config)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
