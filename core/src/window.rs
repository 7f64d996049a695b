//! Sliding window of recent call outcomes
//!
//! A window is either count-based (the last N calls) or time-based (calls
//! recorded within a trailing duration). Aggregate counts are maintained as
//! samples enter and leave, so rate reads are constant time.

use crate::clock::Clock;
use crate::config::{Config, SlidingWindow};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on samples held by a time-based window
pub const DEFAULT_TIME_WINDOW_SAMPLE_CAP: usize = 10_000;

/// Why a call counted as a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The operation returned an error
    Error,
    /// The call was abandoned before it finished (dropped future, panic)
    Cancelled,
}

/// Outcome of a single call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure(FailureKind),
    /// Completed without error but took at least the slow-call threshold
    Slow(Duration),
    /// Short-circuited; the operation never ran
    Rejected,
}

impl CallOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failure(_))
    }

    pub fn is_slow(&self) -> bool {
        matches!(self, CallOutcome::Slow(_))
    }
}

/// A single outcome recorded by the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSample {
    pub outcome: CallOutcome,
    /// Clock offset at which the outcome was recorded
    pub recorded_at: Duration,
}

/// Point-in-time aggregate of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub calls: usize,
    pub failures: usize,
    pub slow_calls: usize,
    pub minimum_calls: usize,
}

impl WindowSnapshot {
    /// Whether enough samples exist for rates to mean anything
    pub fn has_minimum_calls(&self) -> bool {
        self.calls >= self.minimum_calls && self.calls > 0
    }

    /// Failure percentage, or `None` below the minimum number of calls
    pub fn failure_rate(&self) -> Option<f64> {
        self.rate(self.failures)
    }

    /// Slow-call percentage, or `None` below the minimum number of calls
    pub fn slow_call_rate(&self) -> Option<f64> {
        self.rate(self.slow_calls)
    }

    fn rate(&self, count: usize) -> Option<f64> {
        self.has_minimum_calls()
            .then(|| count as f64 * 100.0 / self.calls as f64)
    }
}

#[derive(Debug, Default)]
struct WindowState {
    samples: VecDeque<WindowSample>,
    failures: usize,
    slow_calls: usize,
}

impl WindowState {
    fn push(&mut self, sample: WindowSample) {
        self.tally(&sample.outcome, true);
        self.samples.push_back(sample);
    }

    fn pop_front(&mut self) {
        if let Some(sample) = self.samples.pop_front() {
            self.tally(&sample.outcome, false);
        }
    }

    fn tally(&mut self, outcome: &CallOutcome, add: bool) {
        let counter = match outcome {
            CallOutcome::Failure(_) => &mut self.failures,
            CallOutcome::Slow(_) => &mut self.slow_calls,
            _ => return,
        };
        if add {
            *counter += 1;
        } else {
            *counter -= 1;
        }
    }

    fn evict_expired(&mut self, now: Duration, window: Duration) {
        while let Some(front) = self.samples.front()
            && now.saturating_sub(front.recorded_at) > window
        {
            self.pop_front();
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.failures = 0;
        self.slow_calls = 0;
    }
}

/// Thread-safe sliding window of call outcomes
#[derive(Debug)]
pub struct SlidingWindowStats {
    window: SlidingWindow,
    minimum_calls: usize,
    sample_cap: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

impl SlidingWindowStats {
    /// Create a window shaped by `config`
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self::with_sample_cap(config, clock, DEFAULT_TIME_WINDOW_SAMPLE_CAP)
    }

    /// Create a window whose time-based variant holds at most `sample_cap` samples
    pub fn with_sample_cap(config: &Config, clock: Arc<dyn Clock>, sample_cap: usize) -> Self {
        let capacity = match config.sliding_window {
            SlidingWindow::Count(size) => size,
            SlidingWindow::Time(_) => sample_cap,
        };

        Self {
            window: config.sliding_window,
            minimum_calls: config.effective_minimum_calls(),
            sample_cap: capacity.max(1),
            clock,
            state: Mutex::new(WindowState {
                samples: VecDeque::with_capacity(capacity.clamp(1, 1024)),
                ..Default::default()
            }),
        }
    }

    /// Append an outcome, evicting the oldest samples as needed
    ///
    /// Rejected outcomes are not placed in the window and `false` is returned.
    pub fn record(&self, outcome: CallOutcome) -> bool {
        if outcome == CallOutcome::Rejected {
            return false;
        }

        let now = self.clock.now();
        let mut state = self.state.lock();

        if let SlidingWindow::Time(window) = self.window {
            state.evict_expired(now, window);
        }

        state.push(WindowSample {
            outcome,
            recorded_at: now,
        });

        while state.samples.len() > self.sample_cap {
            state.pop_front();
        }

        true
    }

    /// Current aggregate, after dropping expired samples from a time window
    pub fn snapshot(&self) -> WindowSnapshot {
        let mut state = self.state.lock();

        if let SlidingWindow::Time(window) = self.window {
            state.evict_expired(self.clock.now(), window);
        }

        WindowSnapshot {
            calls: state.samples.len(),
            failures: state.failures,
            slow_calls: state.slow_calls,
            minimum_calls: self.minimum_calls,
        }
    }

    /// Failure percentage, or `None` while below the minimum number of calls
    pub fn failure_rate(&self) -> Option<f64> {
        self.snapshot().failure_rate()
    }

    /// Slow-call percentage, or `None` while below the minimum number of calls
    pub fn slow_call_rate(&self) -> Option<f64> {
        self.snapshot().slow_call_rate()
    }

    /// Number of samples currently held
    pub fn len(&self) -> usize {
        self.snapshot().calls
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent samples, oldest first (limited to last `limit`)
    pub fn recent_samples(&self, limit: usize) -> Vec<WindowSample> {
        let state = self.state.lock();
        let start = state.samples.len().saturating_sub(limit);
        state.samples.iter().skip(start).copied().collect()
    }

    /// Drop every sample
    pub fn reset(&self) {
        self.state.lock().clear();
    }

    pub fn window(&self) -> SlidingWindow {
        self.window
    }
}
