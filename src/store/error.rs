//! Unified error types for storage operations.

use thiserror::Error;

use crate::api::SessionStatus;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Session does not exist.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The status-transition invariant would be violated.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// Stored data could not be decoded.
    #[error("corrupt record in column '{column}': {message}")]
    CorruptRecord {
        column: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn corrupt(column: &'static str, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            column,
            message: message.into(),
        }
    }
}

/// Convenience type alias for storage results.
pub type StoreResult<T> = Result<T, StoreError>;
