//! Error types raised by cloud capability implementations.

use thiserror::Error;

/// Failure of a single cloud call.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("{operation} returned HTTP {status}: {body}")]
    Status { operation: String, status: u16, body: String },

    #[error("{operation} rejected: {message}")]
    Rejected { operation: String, message: String },

    #[error("{operation} returned an unexpected payload: {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("{operation} did not finish after {attempts} polls")]
    PollingExhausted { operation: String, attempts: u32 },

    #[error("resource '{id}' not found")]
    NotFound { id: String },
}

impl CloudError {
    /// Create an HTTP status error.
    pub fn status(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a rejection error.
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}
