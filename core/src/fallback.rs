//! Substitute results for short-circuited or failed calls

use crate::circuit::CircuitState;
use std::time::Duration;

/// Why a call was short-circuited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The circuit is open and its wait has not elapsed
    Open {
        opened_at: Duration,
        remaining: Duration,
    },
    /// The circuit is half-open and every trial slot is taken
    HalfOpenLimitReached { permitted: usize },
}

impl Rejection {
    /// State that produced the rejection
    pub fn state(&self) -> CircuitState {
        match self {
            Rejection::Open { .. } => CircuitState::Open,
            Rejection::HalfOpenLimitReached { .. } => CircuitState::HalfOpen,
        }
    }
}

/// What triggered the fallback
#[derive(Debug)]
pub enum FallbackReason<E> {
    /// The operation never ran
    Rejected(Rejection),
    /// The operation ran and returned this error
    Failed(E),
}

/// Context handed to a fallback
#[derive(Debug)]
pub struct FallbackContext<E> {
    /// Circuit name
    pub circuit_name: String,
    /// State the breaker was in when the call was admitted or rejected
    pub state: CircuitState,
    pub reason: FallbackReason<E>,
}

impl<E> FallbackContext<E> {
    pub fn is_rejection(&self) -> bool {
        matches!(self.reason, FallbackReason::Rejected(_))
    }

    /// The operation error, if the operation ran and failed
    pub fn into_error(self) -> Option<E> {
        match self.reason {
            FallbackReason::Failed(e) => Some(e),
            FallbackReason::Rejected(_) => None,
        }
    }
}

/// Strategy producing a substitute result
///
/// Implemented for any `FnOnce(FallbackContext<E>) -> Result<T, E>`, so most
/// callers pass a closure. An `Err` returned here is not recovered again; it
/// reaches the caller as [`CircuitError::Fallback`](crate::CircuitError::Fallback).
pub trait Fallback<T, E> {
    fn recover(self, ctx: FallbackContext<E>) -> Result<T, E>;
}

impl<T, E, F> Fallback<T, E> for F
where
    F: FnOnce(FallbackContext<E>) -> Result<T, E>,
{
    fn recover(self, ctx: FallbackContext<E>) -> Result<T, E> {
        self(ctx)
    }
}

/// Fallback returning a fixed value regardless of the reason
#[derive(Debug, Clone)]
pub struct Value<T>(pub T);

impl<T, E> Fallback<T, E> for Value<T> {
    fn recover(self, _ctx: FallbackContext<E>) -> Result<T, E> {
        Ok(self.0)
    }
}

/// Fallback returning `value`
pub fn value<T>(value: T) -> Value<T> {
    Value(value)
}

/// Fallback building its result from `T::default()`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValue;

impl<T: Default, E> Fallback<T, E> for DefaultValue {
    fn recover(self, _ctx: FallbackContext<E>) -> Result<T, E> {
        Ok(T::default())
    }
}
