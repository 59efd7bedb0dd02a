//! Common Error Types for the Custodia Backend
//!
//! Each layer owns a `thiserror` enum; this root type folds them together
//! for the binary and the API layer.

use thiserror::Error;

use crate::chain::ChainError;
use crate::service::ServiceError;
use crate::storage::StorageError;
use crate::sync::SyncError;

/// Root error type for the Custodia backend
#[derive(Debug, Error)]
pub enum CustodiaError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Chain adapter errors
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Ledger storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Ledger synchronizer errors
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Deposit/withdraw pipeline errors
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CustodiaError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            CustodiaError::Chain(e) => e.is_retryable(),
            CustodiaError::Sync(e) => e.is_retryable(),
            CustodiaError::Service(e) => e.is_retryable(),
            CustodiaError::Storage(_) | CustodiaError::Io(_) => true,
            _ => false,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            CustodiaError::Config(_) => "CONFIG_ERROR",
            CustodiaError::Logging(_) => "LOGGING_ERROR",
            CustodiaError::Chain(e) => e.error_code(),
            CustodiaError::Storage(_) => "STORAGE_ERROR",
            CustodiaError::Sync(_) => "SYNC_ERROR",
            CustodiaError::Service(e) => e.error_code(),
            CustodiaError::Validation(_) => "VALIDATION_ERROR",
            CustodiaError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using CustodiaError
pub type Result<T> = std::result::Result<T, CustodiaError>;
