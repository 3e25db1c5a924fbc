use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the sparrow-billing engine
#[derive(Debug, Error)]
pub enum BillingError {
    // Validation errors
    #[error("Validation failed: {} errors", .0.len())]
    ValidationFailed(Vec<ValidationError>),

    // State machine errors
    #[error("Command '{command}' is not allowed while ride is {phase}")]
    InvalidTransition { command: String, phase: String },
    #[error("Free waiting cannot be re-enabled: {0}")]
    ReenableRejected(String),
    #[error("Driver has not confirmed payment for ride {0}")]
    PaymentNotConfirmed(String),
    #[error("Ride {0} is already completed")]
    RideAlreadyCompleted(String),
    #[error("Ride runtime for {0} has stopped")]
    RuntimeStopped(String),

    // Fare computation and configuration errors
    #[error("No fare rate configured for vehicle category '{0}'")]
    MissingFareRate(String),
    #[error("Fare computation failed: {0}")]
    FareComputation(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // Backend and network errors
    #[error("Network request timed out")]
    NetworkTimeout,
    #[error("Network connection error: {0}")]
    NetworkConnection(String),
    #[error("HTTP client error: {0}")]
    HttpClient(String),
    #[error("Backend rejected {operation}: {reason}")]
    BackendRejected { operation: String, reason: String },
    #[error("Backend unavailable for {operation}: {reason}")]
    BackendUnavailable { operation: String, reason: String },
    #[error("Ride completion failed, retry completion: {0}")]
    CompletionFailed(Box<BillingError>),

    // Persistence errors
    #[error("Session store error: {0}")]
    Store(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

// Convenience type alias for Results
pub type BillingResult<T> = Result<T, BillingError>;

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BillingError::NetworkTimeout
        } else if err.is_connect() || err.is_request() {
            BillingError::NetworkConnection(err.to_string())
        } else {
            BillingError::HttpClient(err.to_string())
        }
    }
}

impl From<redis::RedisError> for BillingError {
    fn from(err: redis::RedisError) -> Self {
        BillingError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Json(err.to_string())
    }
}

// Helper functions for creating common errors
impl BillingError {
    pub fn invalid_transition(command: impl Into<String>, phase: impl std::fmt::Display) -> Self {
        BillingError::InvalidTransition {
            command: command.into(),
            phase: phase.to_string(),
        }
    }

    pub fn backend_rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        BillingError::BackendRejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn backend_unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        BillingError::BackendUnavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Transient failures worth retrying: transport errors and 5xx responses.
    /// A backend that answered with a rejection will answer the same again.
    pub fn is_retriable(&self) -> bool {
        match self {
            BillingError::NetworkTimeout
            | BillingError::NetworkConnection(_)
            | BillingError::BackendUnavailable { .. } => true,
            BillingError::CompletionFailed(inner) => inner.is_retriable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BillingError::MissingFareRate("limo".to_string());
        assert_eq!(error.to_string(), "No fare rate configured for vehicle category 'limo'");

        let error = BillingError::invalid_transition("pause", "Pickup");
        assert_eq!(error.to_string(), "Command 'pause' is not allowed while ride is Pickup");
    }

    #[test]
    fn test_retriable_classification() {
        assert!(BillingError::NetworkTimeout.is_retriable());
        assert!(BillingError::backend_unavailable("complete_ride", "HTTP 503").is_retriable());
        assert!(!BillingError::backend_rejected("set_pause_state", "HTTP 404: no such ride").is_retriable());
        assert!(!BillingError::HttpClient("error decoding response body".to_string()).is_retriable());
        assert!(!BillingError::CompletionFailed(Box::new(BillingError::backend_rejected("complete_ride", "under review"))).is_retriable());
        assert!(BillingError::CompletionFailed(Box::new(BillingError::NetworkTimeout)).is_retriable());
        assert!(!BillingError::PaymentNotConfirmed("r1".to_string()).is_retriable());
        assert!(!BillingError::MissingFareRate("x".to_string()).is_retriable());
    }
}
