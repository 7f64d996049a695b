//! Error types for circuit breaker operations

use std::time::Duration;
use thiserror::Error;

/// Errors returned by protected calls
///
/// `Open` and `HalfOpenLimitReached` mean the operation was never attempted.
/// They only surface when the caller did not supply a fallback; with a
/// fallback, the only error a caller can observe is `Fallback`.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open, calls are being rejected
    #[error("circuit '{circuit}' is open (opened at {opened_at:?}, retry in {remaining:?})")]
    Open {
        circuit: String,
        opened_at: Duration,
        remaining: Duration,
    },
    /// Every trial slot of the half-open batch is taken
    #[error("circuit '{circuit}' half-open trial limit reached ({permitted} calls)")]
    HalfOpenLimitReached { circuit: String, permitted: usize },
    /// The wrapped operation failed
    #[error("circuit execution failed: {0}")]
    Execution(E),
    /// The fallback itself failed
    #[error("circuit fallback failed: {0}")]
    Fallback(E),
}

impl<E> CircuitError<E> {
    /// True when the operation was short-circuited without running
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            CircuitError::Open { .. } | CircuitError::HalfOpenLimitReached { .. }
        )
    }

    /// The operation or fallback error, if any
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) | CircuitError::Fallback(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid configuration, detected when a breaker is built
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be a percentage between 0 and 100, got {value}")]
    PercentOutOfRange { field: &'static str, value: f64 },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("jitter_factor must be between 0.0 and 1.0, got {value}")]
    JitterOutOfRange { value: f64 },

    #[error("invalid configuration for circuit '{name}': {source}")]
    Instance {
        name: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_message() {
        let err: CircuitError<String> = CircuitError::Open {
            circuit: "reading_list".to_string(),
            opened_at: Duration::from_secs(3),
            remaining: Duration::from_secs(7),
        };

        assert_eq!(
            err.to_string(),
            "circuit 'reading_list' is open (opened at 3s, retry in 7s)"
        );
        assert!(err.is_rejected());
        assert!(err.into_inner().is_none());
    }

    #[test]
    fn test_execution_and_fallback_carry_inner_error() {
        let err = CircuitError::Execution("boom");
        assert_eq!(err.to_string(), "circuit execution failed: boom");
        assert!(!err.is_rejected());
        assert_eq!(err.into_inner(), Some("boom"));

        let err = CircuitError::Fallback("fallback boom");
        assert_eq!(err.to_string(), "circuit fallback failed: fallback boom");
        assert_eq!(err.into_inner(), Some("fallback boom"));
    }

    #[test]
    fn test_source_chain_for_std_errors() {
        use std::error::Error as _;

        let err = ConfigError::Instance {
            name: "api".to_string(),
            source: Box::new(ConfigError::Zero {
                field: "minimum_number_of_calls",
            }),
        };

        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "invalid configuration for circuit 'api': minimum_number_of_calls must be greater than zero"
        );
    }
}
