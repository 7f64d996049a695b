//! Breaker configuration and validation

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Shape of the sliding window that rates are computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlidingWindow {
    /// The last `n` recorded calls
    Count(usize),
    /// Calls recorded within a trailing duration, in seconds
    #[serde(rename = "time_secs")]
    Time(#[serde(with = "duration_secs")] Duration),
}

impl Default for SlidingWindow {
    fn default() -> Self {
        SlidingWindow::Count(100)
    }
}

/// Circuit breaker configuration
///
/// Immutable once a breaker has been built from it. Percentages are expressed
/// on a 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Failure percentage at or above which the circuit opens
    pub failure_rate_threshold: f64,

    /// Slow-call percentage at or above which the circuit opens
    pub slow_call_rate_threshold: f64,

    /// Calls taking at least this long are recorded as slow
    #[serde(rename = "slow_call_duration_threshold_secs", with = "duration_secs")]
    pub slow_call_duration_threshold: Duration,

    /// Window the rates are computed over
    pub sliding_window: SlidingWindow,

    /// Samples required before rates are evaluated at all
    pub minimum_number_of_calls: usize,

    /// How long the circuit stays open before a trial call is let through
    #[serde(rename = "wait_duration_in_open_state_secs", with = "duration_secs")]
    pub wait_duration_in_open_state: Duration,

    /// Size of the trial batch in HalfOpen
    pub permitted_calls_in_half_open_state: usize,

    /// Jitter factor for the open wait (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: wait * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            sliding_window: SlidingWindow::default(),
            minimum_number_of_calls: 100,
            wait_duration_in_open_state: Duration::from_secs(60),
            permitted_calls_in_half_open_state: 10,
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    /// Reject configurations that could never behave sensibly
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_percent("failure_rate_threshold", self.failure_rate_threshold)?;
        check_percent("slow_call_rate_threshold", self.slow_call_rate_threshold)?;

        if self.minimum_number_of_calls == 0 {
            return Err(ConfigError::Zero {
                field: "minimum_number_of_calls",
            });
        }
        if self.permitted_calls_in_half_open_state == 0 {
            return Err(ConfigError::Zero {
                field: "permitted_calls_in_half_open_state",
            });
        }

        match self.sliding_window {
            SlidingWindow::Count(0) => {
                return Err(ConfigError::Zero {
                    field: "sliding_window",
                });
            }
            SlidingWindow::Time(window) if window.is_zero() => {
                return Err(ConfigError::Zero {
                    field: "sliding_window",
                });
            }
            _ => {}
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange {
                value: self.jitter_factor,
            });
        }

        Ok(())
    }

    /// Minimum number of calls actually applied to rate evaluation
    ///
    /// A count window can never hold more samples than its size, so the
    /// minimum is capped there.
    pub fn effective_minimum_calls(&self) -> usize {
        match self.sliding_window {
            SlidingWindow::Count(size) => self.minimum_number_of_calls.min(size),
            SlidingWindow::Time(_) => self.minimum_number_of_calls,
        }
    }

    /// True when the given rates breach either threshold
    pub(crate) fn is_breached(&self, failure_rate: f64, slow_call_rate: f64) -> bool {
        failure_rate >= self.failure_rate_threshold
            || slow_call_rate >= self.slow_call_rate_threshold
    }
}

/// Durations written as (fractional) seconds, e.g. `2.5`
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {secs}"
            ))
        })
    }
}

fn check_percent(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::PercentOutOfRange { field, value })
    }
}

/// Configuration for a whole [`CircuitRegistry`](crate::CircuitRegistry)
///
/// ```toml
/// [default]
/// failure_rate_threshold = 50.0
/// minimum_number_of_calls = 10
///
/// [instances.reading_list]
/// failure_rate_threshold = 25.0
/// sliding_window = { count = 20 }
/// wait_duration_in_open_state_secs = 10
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Used by breakers with no entry in `instances`
    pub default: Config,
    /// Per-breaker overrides keyed by breaker name
    pub instances: HashMap<String, Config>,
}

impl RegistryConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: RegistryConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default.validate()?;
        for (name, config) in &self.instances {
            config.validate().map_err(|source| ConfigError::Instance {
                name: name.clone(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    /// Configuration for the named breaker
    pub fn for_instance(&self, name: &str) -> &Config {
        self.instances.get(name).unwrap_or(&self.default)
    }
}
