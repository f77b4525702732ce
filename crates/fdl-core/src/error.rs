//! Domain-specific error types following panic-free policy.

use thiserror::Error;

use crate::child::LivenessState;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// App names are exactly four bytes on the wire
    #[error("Invalid app name {value:?}: expected 1 to 4 ASCII characters")]
    InvalidAppName { value: String },

    /// No free 4-char name remains for an item
    #[error("No unique assigned name available for item {item_name}")]
    NameExhausted { item_name: String },

    /// Liveness only moves forward unless the child is relaunched
    #[error("Illegal liveness transition {from} -> {to}")]
    IllegalTransition {
        from: LivenessState,
        to: LivenessState,
    },

    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
