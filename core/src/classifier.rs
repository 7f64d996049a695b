//! Failure classification
//!
//! Decides which operation errors count against the dependency's health.
//! An error the classifier ignores is still returned to the caller (or handed
//! to the fallback) but is recorded as a successful interaction, the way a
//! 404 from a healthy server would be.

use std::any::Any;
use std::marker::PhantomData;
use std::time::Duration;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// How long the failed call ran
    pub duration: Duration,
}

/// Determines if an error should count as a failure
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the error should count toward opening the circuit
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Default classifier that trips on all errors
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Predicate-based classifier using a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

/// Classifier over a concrete error type
///
/// Errors of type `E` trip the circuit when `predicate` says so; errors of any
/// other type always trip.
///
/// ```rust
/// use tripswitch::TypedClassifier;
///
/// #[derive(Debug)]
/// enum ApiError {
///     NotFound,
///     Unavailable,
/// }
///
/// let classifier = TypedClassifier::new(|e: &ApiError| matches!(e, ApiError::Unavailable));
/// ```
pub struct TypedClassifier<E, F> {
    predicate: F,
    _error: PhantomData<fn(&E)>,
}

impl<E, F> TypedClassifier<E, F>
where
    E: 'static,
    F: Fn(&E) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _error: PhantomData,
        }
    }
}

impl<E, F> FailureClassifier for TypedClassifier<E, F>
where
    E: 'static,
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        ctx.error
            .downcast_ref::<E>()
            .map(|e| (self.predicate)(e))
            .unwrap_or(true)
    }
}

impl<E, F> std::fmt::Debug for TypedClassifier<E, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedClassifier")
            .field("error", &std::any::type_name::<E>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(error: &'a dyn Any, duration: Duration) -> FailureContext<'a> {
        FailureContext {
            circuit_name: "test",
            error,
            duration,
        }
    }

    #[test]
    fn test_default_classifier_trips_all() {
        let classifier = DefaultClassifier;
        assert!(classifier.should_trip(&ctx(&"any error", Duration::from_millis(100))));
    }

    #[test]
    fn test_predicate_classifier() {
        // Classifier that only trips on slow errors
        let classifier = PredicateClassifier::new(|ctx| ctx.duration > Duration::from_secs(1));

        assert!(!classifier.should_trip(&ctx(&"fast error", Duration::from_millis(500))));
        assert!(classifier.should_trip(&ctx(&"slow error", Duration::from_secs(2))));
    }

    #[test]
    fn test_typed_classifier_downcasts() {
        #[derive(Debug)]
        enum ApiError {
            Client(u16),
            Server(u16),
        }

        let classifier = TypedClassifier::new(|e: &ApiError| match e {
            ApiError::Server(code) => *code >= 500,
            ApiError::Client(_) => false,
        });

        let server = ApiError::Server(503);
        let client = ApiError::Client(404);

        assert!(classifier.should_trip(&ctx(&server, Duration::ZERO)));
        assert!(!classifier.should_trip(&ctx(&client, Duration::ZERO)));
        // Trip on unknown errors
        assert!(classifier.should_trip(&ctx(&"io error", Duration::ZERO)));
        assert!(format!("{:?}", classifier).contains("ApiError"));
    }
}
