//! Domain-specific error types following panic-free policy.

use crate::SessionState;
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Display name rejected by identity validation
    #[error("Invalid identity '{value}': {reason}")]
    InvalidIdentity { value: String, reason: String },

    /// Event payload that cannot form a valid chat event
    #[error("Malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// Session state change outside the allowed transition table
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

impl DomainError {
    /// Creates an invalid identity error.
    pub fn invalid_identity(value: &str, reason: &str) -> Self {
        Self::InvalidIdentity {
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a malformed event error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
