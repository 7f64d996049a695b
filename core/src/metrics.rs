//! Observability snapshot for metrics export

use crate::circuit::CircuitState;
use crate::window::{CallOutcome, FailureKind, WindowSnapshot};

/// Lifetime call counters of one breaker (since creation or last reset)
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CallCounters {
    successful: u64,
    failed: u64,
    cancelled: u64,
    slow: u64,
    rejected: u64,
}

impl CallCounters {
    pub(crate) fn tally(&mut self, outcome: CallOutcome) {
        match outcome {
            CallOutcome::Success => self.successful += 1,
            CallOutcome::Slow(_) => self.slow += 1,
            CallOutcome::Rejected => self.rejected += 1,
            CallOutcome::Failure(kind) => {
                self.failed += 1;
                if kind == FailureKind::Cancelled {
                    self.cancelled += 1;
                }
            }
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    /// Window failure percentage, `None` below the minimum number of calls
    pub failure_rate: Option<f64>,
    /// Window slow-call percentage, `None` below the minimum number of calls
    pub slow_call_rate: Option<f64>,
    /// Samples currently in the window
    pub buffered_calls: usize,
    pub buffered_failures: usize,
    pub buffered_slow_calls: usize,
    pub successful_calls: u64,
    /// Failed calls, cancellations included
    pub failed_calls: u64,
    pub cancelled_calls: u64,
    pub slow_calls: u64,
    /// Calls short-circuited without running
    pub rejected_calls: u64,
}

impl CircuitMetrics {
    pub(crate) fn new(state: CircuitState, window: WindowSnapshot, counters: &CallCounters) -> Self {
        Self {
            state,
            failure_rate: window.failure_rate(),
            slow_call_rate: window.slow_call_rate(),
            buffered_calls: window.calls,
            buffered_failures: window.failures,
            buffered_slow_calls: window.slow_calls,
            successful_calls: counters.successful,
            failed_calls: counters.failed,
            cancelled_calls: counters.cancelled,
            slow_calls: counters.slow,
            rejected_calls: counters.rejected,
        }
    }

    /// Every call attempt seen, rejected ones included
    pub fn total_calls(&self) -> u64 {
        self.successful_calls + self.failed_calls + self.slow_calls + self.rejected_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_counters_feed_metrics() {
        let mut counters = CallCounters::default();
        counters.tally(CallOutcome::Success);
        counters.tally(CallOutcome::Slow(Duration::from_secs(3)));
        counters.tally(CallOutcome::Failure(FailureKind::Error));
        counters.tally(CallOutcome::Failure(FailureKind::Cancelled));
        counters.tally(CallOutcome::Rejected);

        let window = WindowSnapshot {
            calls: 4,
            failures: 2,
            slow_calls: 1,
            minimum_calls: 4,
        };
        let metrics = CircuitMetrics::new(CircuitState::Closed, window, &counters);

        assert_eq!(metrics.failure_rate, Some(50.0));
        assert_eq!(metrics.slow_call_rate, Some(25.0));
        assert_eq!(metrics.failed_calls, 2);
        assert_eq!(metrics.cancelled_calls, 1);
        assert_eq!(metrics.rejected_calls, 1);
        assert_eq!(metrics.total_calls(), 5);
    }

    #[test]
    fn test_rates_absent_below_minimum() {
        let window = WindowSnapshot {
            calls: 3,
            failures: 3,
            slow_calls: 0,
            minimum_calls: 10,
        };
        let metrics = CircuitMetrics::new(CircuitState::Closed, window, &CallCounters::default());

        assert_eq!(metrics.failure_rate, None);
        assert_eq!(metrics.buffered_failures, 3);
    }
}
