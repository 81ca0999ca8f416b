//! Webhook Engine Error Types
//!
//! This module defines all error types that can occur while recording,
//! attempting, sweeping or replaying webhook records.

use uuid::Uuid;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, WebhookError>;

/// Error types for webhook engine operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Unknown record id
    #[error("Webhook record not found: {0}")]
    NotFound(Uuid),

    /// Illegal state transition or stale precondition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unrecoverable processing condition
    #[error("Processing error: {0}")]
    Processing(String),

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence failure (connectivity, I/O, corrupt snapshot)
    #[error("Store error: {0}")]
    Store(String),
}

impl WebhookError {
    /// Message safe to show to an operator or API client.
    ///
    /// Processing and store failures are collapsed to a generic message so
    /// internals never leak through the route layer.
    pub fn public_message(&self) -> String {
        match self {
            WebhookError::NotFound(_) | WebhookError::Conflict(_) | WebhookError::Validation(_) => {
                self.to_string()
            }
            WebhookError::Processing(_) | WebhookError::Store(_) => {
                "internal error while handling webhook record".to_string()
            }
        }
    }

    /// Whether this error maps to a 404-equivalent
    pub fn is_not_found(&self) -> bool {
        matches!(self, WebhookError::NotFound(_))
    }

    /// Whether this error came from the persistence layer
    pub fn is_store(&self) -> bool {
        matches!(self, WebhookError::Store(_))
    }
}

impl From<std::io::Error> for WebhookError {
    fn from(err: std::io::Error) -> Self {
        WebhookError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Store(err.to_string())
    }
}
