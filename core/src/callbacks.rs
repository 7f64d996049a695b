//! Hooks for circuit breaker state transitions and rejections

use crate::circuit::CircuitState;
use std::sync::Arc;

/// Hook receiving the circuit name
pub type CircuitHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for circuit breaker events
///
/// Hooks run after the breaker has released its internal lock, so they may
/// freely query the breaker that invoked them.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<CircuitHook>,
    pub on_close: Option<CircuitHook>,
    pub on_half_open: Option<CircuitHook>,
    pub on_rejected: Option<CircuitHook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the hook registered for entering `state`
    pub fn trigger_transition(&self, circuit: &str, state: CircuitState) {
        let hook = match state {
            CircuitState::Open => &self.on_open,
            CircuitState::Closed => &self.on_close,
            CircuitState::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = hook {
            callback(circuit);
        }
    }

    pub fn trigger_rejected(&self, circuit: &str) {
        if let Some(ref callback) = self.on_rejected {
            callback(circuit);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("on_rejected", &self.on_rejected.is_some())
            .finish()
    }
}
