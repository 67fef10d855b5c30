//! Error types for record conversion and validation.

use thiserror::Error;

use crate::Kind;

/// Errors raised by the record model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The parameters are structurally invalid.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A dynamic object was converted into the wrong kind.
    #[error("kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: Kind, actual: Kind },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ApiError {
    /// Returns true if this error is a validation failure.
    pub fn is_invalid_spec(&self) -> bool {
        matches!(self, ApiError::InvalidSpec(_))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Serialization(err.to_string())
    }
}
