//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the Custodia backend.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - The root error type

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{
    AssetConfig, AssetKind, ChainConfig, ChainKind, ConfigError, CustodiaConfig, Network,
    SyncConfig,
};
pub use error::{CustodiaError, Result};
pub use logging::{
    generate_correlation_id, init_from_config, init_logging, log_api_response, log_deposit_event,
    log_ledger_event, log_signing_event, log_withdrawal_event, EventCategory,
    LogEvent, LogLevel, LoggingError, WithdrawalLog,
};
