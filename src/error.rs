//! Engine error type
//!
//! Expected outcomes (no match, duplicate, I/O failure on a single file) are
//! recorded as result statuses. Only the cases below reach the caller.

use thiserror::Error;

use crate::db::OrganizationStatus;

#[derive(Debug, Error)]
pub enum OrganizeError {
    /// Another operation holds the guard for this path
    #[error("'{0}' is currently being processed by another operation")]
    InProgress(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Organization result '{0}' not found")]
    ResultNotFound(String),

    #[error("Result '{id}' has status {status} and cannot be changed")]
    InvalidState {
        id: String,
        status: OrganizationStatus,
    },

    /// A correction was applied but the file did not reach `success`
    #[error("Correction did not succeed ({status}): {message}")]
    CorrectionFailed {
        status: OrganizationStatus,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrganizeError {
    /// Contention errors are user-facing and safe to retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InProgress(_))
    }
}
