//! Admission tickets for protected calls
//!
//! Every call the breaker lets through holds a [`CallPermit`] until its
//! outcome is known. Settling the permit records exactly one outcome; a permit
//! dropped without being settled (panic, cancelled future, timeout wrapper)
//! records a cancellation failure, so abandoned calls still count.

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::window::{CallOutcome, FailureKind};
use std::time::Duration;

/// Permission to run one protected call
#[must_use = "dropping a permit records the call as cancelled"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    state: CircuitState,
    started_at: Duration,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    pub(crate) fn new(breaker: &'a CircuitBreaker, epoch: u64, state: CircuitState) -> Self {
        Self {
            breaker,
            epoch,
            state,
            started_at: breaker.clock().now(),
            settled: false,
        }
    }

    /// State the call was admitted in
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Time since the permit was granted
    pub fn elapsed(&self) -> Duration {
        self.breaker.clock().now().saturating_sub(self.started_at)
    }

    /// Record a call that completed without error (slow if it took too long)
    pub fn success(mut self) {
        let outcome = self.breaker.classify_success(self.elapsed());
        self.settle(outcome);
    }

    /// Record a call that failed
    pub fn failure(mut self) {
        self.settle(CallOutcome::Failure(FailureKind::Error));
    }

    /// Record an explicit outcome
    ///
    /// An admitted call cannot have been rejected, so `Rejected` is recorded
    /// as a cancellation and never completes a half-open trial as a pass.
    pub fn record(mut self, outcome: CallOutcome) {
        let outcome = match outcome {
            CallOutcome::Rejected => CallOutcome::Failure(FailureKind::Cancelled),
            other => other,
        };
        self.settle(outcome);
    }

    /// Classify `result`, record it and hand it back unchanged
    pub fn record_result<T, E: 'static>(mut self, result: Result<T, E>) -> Result<T, E> {
        let elapsed = self.elapsed();
        let outcome = match &result {
            Ok(_) => self.breaker.classify_success(elapsed),
            Err(e) if self.breaker.counts_as_failure(e, elapsed) => {
                CallOutcome::Failure(FailureKind::Error)
            }
            Err(_) => self.breaker.classify_success(elapsed),
        };
        self.settle(outcome);
        result
    }

    fn settle(&mut self, outcome: CallOutcome) {
        if !self.settled {
            self.settled = true;
            self.breaker.complete(self.epoch, outcome);
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        self.settle(CallOutcome::Failure(FailureKind::Cancelled));
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::window::{CallOutcome, FailureKind};
    use crate::{CircuitBreaker, CircuitState};
    use std::sync::Arc;
    use std::time::Duration;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::builder("permit_test")
            .count_window(10)
            .minimum_calls(10)
            .slow_call_duration_threshold(Duration::from_secs(2))
            .clock(clock)
            .build()
            .expect("valid config")
    }

    #[test]
    fn test_dropped_permit_records_cancellation() {
        let circuit = breaker(Arc::new(ManualClock::new()));

        let permit = circuit.try_acquire().expect("closed circuit admits");
        drop(permit);

        let metrics = circuit.metrics();
        assert_eq!(metrics.failed_calls, 1);
        assert_eq!(metrics.cancelled_calls, 1);
        assert_eq!(metrics.buffered_calls, 1);
    }

    #[test]
    fn test_success_classified_as_slow_by_elapsed_time() {
        let clock = Arc::new(ManualClock::new());
        let circuit = breaker(clock.clone());

        let permit = circuit.try_acquire().expect("admitted");
        clock.advance(Duration::from_secs(3));
        assert_eq!(permit.elapsed(), Duration::from_secs(3));
        permit.success();

        let permit = circuit.try_acquire().expect("admitted");
        clock.advance(Duration::from_millis(10));
        permit.success();

        let samples = circuit.recent_samples(2);
        assert_eq!(samples[0].outcome, CallOutcome::Slow(Duration::from_secs(3)));
        assert_eq!(samples[1].outcome, CallOutcome::Success);
    }

    #[test]
    fn test_each_permit_records_exactly_once() {
        let circuit = breaker(Arc::new(ManualClock::new()));

        circuit.try_acquire().expect("admitted").failure();
        let result = circuit
            .try_acquire()
            .expect("admitted")
            .record_result(Err::<(), _>("boom"));
        assert!(result.is_err());

        let metrics = circuit.metrics();
        assert_eq!(metrics.failed_calls, 2);
        assert_eq!(metrics.cancelled_calls, 0);
        assert_eq!(metrics.buffered_calls, 2);
    }

    #[test]
    fn test_panicking_call_counts_as_failure() {
        let circuit = breaker(Arc::new(ManualClock::new()));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = circuit.call(|| -> Result<(), String> { panic!("Simulated panic") });
        }));

        assert!(result.is_err());
        assert_eq!(circuit.metrics().cancelled_calls, 1);
    }

    #[test]
    fn test_recording_rejected_on_admitted_call_counts_as_cancelled() {
        let clock = Arc::new(ManualClock::new());
        let circuit = CircuitBreaker::builder("permit_test")
            .count_window(4)
            .minimum_calls(4)
            .wait_duration_in_open_state(Duration::from_secs(10))
            .permitted_calls_in_half_open_state(2)
            .clock(clock.clone())
            .build()
            .expect("valid config");

        for _ in 0..4 {
            circuit.try_acquire().expect("admitted").failure();
        }
        assert_eq!(circuit.state(), CircuitState::Open);
        clock.advance(Duration::from_secs(10));

        circuit.try_acquire().expect("trial").record(CallOutcome::Rejected);
        circuit.try_acquire().expect("trial").record(CallOutcome::Rejected);

        let metrics = circuit.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.rejected_calls, 0);
        assert_eq!(metrics.successful_calls, 0);
        assert_eq!(metrics.cancelled_calls, 2);
    }

    #[test]
    fn test_recorded_outcome_kept_as_given() {
        let circuit = breaker(Arc::new(ManualClock::new()));

        circuit
            .try_acquire()
            .expect("admitted")
            .record(CallOutcome::Failure(FailureKind::Cancelled));
        circuit
            .try_acquire()
            .expect("admitted")
            .record(CallOutcome::Slow(Duration::from_secs(5)));

        let samples = circuit.recent_samples(2);
        assert_eq!(samples[0].outcome, CallOutcome::Failure(FailureKind::Cancelled));
        assert_eq!(samples[1].outcome, CallOutcome::Slow(Duration::from_secs(5)));
    }
}
