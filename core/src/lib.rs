//! Tripswitch - circuit breaker with rate-based thresholds
//!
//! This crate provides a complete circuit breaker implementation with:
//! - Count- or time-based sliding windows tracking failure and slow-call rates
//! - State machine for circuit breaker lifecycle (Closed → Open → HalfOpen)
//! - Bounded half-open trial batches with a single verdict
//! - Fallbacks for rejected and failed calls
//! - Monotonic time tracking to prevent NTP clock skew issues
//! - A registry mapping dependency names to breakers
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use tripswitch::{CircuitBreaker, FallbackContext};
//!
//! let circuit = CircuitBreaker::builder("reading_list")
//!     .failure_rate_threshold(50.0)
//!     .count_window(20)
//!     .minimum_calls(10)
//!     .wait_duration_in_open_state(Duration::from_secs(30))
//!     .permitted_calls_in_half_open_state(3)
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build()
//!     .expect("valid configuration");
//!
//! // Execute with circuit protection
//! let books = circuit.call_with_fallback(
//!     || Ok::<_, String>("Spring in Action (Manning)".to_string()),
//!     |_ctx: FallbackContext<String>| Ok("Cloud Native Java (O'Reilly)".to_string()),
//! );
//! assert!(books.is_ok());
//!
//! // Check circuit state
//! if circuit.is_open() {
//!     println!("Circuit is open, skipping call");
//! }
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod errors;
pub mod fallback;
pub mod metrics;
pub mod permit;
pub mod registry;
pub mod window;

pub use builder::CircuitBuilder;
pub use callbacks::Callbacks;
pub use circuit::{CircuitBreaker, CircuitState};
pub use classifier::{
    DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier, TypedClassifier,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Config, RegistryConfig, SlidingWindow};
pub use errors::{CircuitError, ConfigError};
pub use fallback::{Fallback, FallbackContext, FallbackReason, Rejection};
pub use metrics::CircuitMetrics;
pub use permit::CallPermit;
pub use registry::CircuitRegistry;
pub use window::{CallOutcome, FailureKind, SlidingWindowStats, WindowSample, WindowSnapshot};
