//! Error types for the runtime.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use rampart_core::CoreError;

/// Usage and configuration errors from the resilience managers.
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Service not registered: {0}")]
    NotRegistered(String),

    #[error("Endpoint '{endpoint}' is not registered for service {service}")]
    UnknownEndpoint { service: String, endpoint: String },

    #[error("No handler registered for degradation level '{level}' of service {service}")]
    MissingHandler { service: String, level: String },

    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),
}

/// Fast-fail signal from an open circuit.
///
/// Not a failure of the guarded operation; callers must not count it as one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker '{name}' is open, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call
    pub name: String,

    /// Time left until the breaker allows a trial call
    pub retry_after: Duration,
}

/// Outcome of a call guarded by a circuit breaker.
///
/// `Operation` carries the wrapped operation's error untouched.
#[derive(Debug)]
pub enum CallError<E> {
    /// The breaker rejected the call without invoking the operation
    Open(CircuitOpenError),

    /// The operation ran and failed
    Operation(E),
}

impl<E> CallError<E> {
    /// Whether the call was rejected by an open circuit.
    pub fn is_open(&self) -> bool {
        matches!(self, CallError::Open(_))
    }

    /// The operation's own error, if the operation ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            CallError::Operation(e) => Some(e),
            CallError::Open(_) => None,
        }
    }
}

impl<E> From<CircuitOpenError> for CallError<E> {
    fn from(err: CircuitOpenError) -> Self {
        CallError::Open(err)
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Open(e) => e.fmt(f),
            CallError::Operation(e) => e.fmt(f),
        }
    }
}

impl<E> std::error::Error for CallError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Open(_) => None,
            CallError::Operation(e) => e.source(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_call_error_passes_operation_error_through() {
        let err: CallError<io::Error> =
            CallError::Operation(io::Error::new(io::ErrorKind::Other, "boom"));

        assert!(!err.is_open());
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.into_operation().unwrap().to_string(), "boom");
    }

    #[test]
    fn test_open_error_is_distinct() {
        let err: CallError<io::Error> = CircuitOpenError {
            name: "payments".to_string(),
            retry_after: Duration::from_secs(3),
        }
        .into();

        assert!(err.is_open());
        assert!(err.to_string().contains("payments"));
        assert!(err.into_operation().is_none());
    }
}
