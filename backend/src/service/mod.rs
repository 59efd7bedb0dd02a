//! Wallet service layer
//!
//! [`WalletService`] drives the deposit and withdraw flows against the chain
//! adapters, the ledger store and the signing boundary. The boundary is
//! reached through [`SigningBoundary`]; [`SignerClient`] is the HTTP
//! implementation that talks to the `custodia-signer` process.

pub mod rpc;
pub mod signer_client;
pub mod wallet;

use thiserror::Error;

use crate::chain::ChainError;
use crate::storage::StorageError;

pub use rpc::{
    AddressRequest, AddressResponse, BootstrapResponse, ErrorResponse, SignTxRequest, SignTxResponse,
};
pub use signer_client::{SignerClient, SigningBoundary};
pub use wallet::{BalanceView, ChainHandle, WalletService, WithdrawReceipt, WithdrawRequest};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    #[error("no adapter for chain {0}")]
    UnknownChain(String),

    #[error("address {0} is not a custody address")]
    NotTracked(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("signer refused ({status}): {message}")]
    Signer { status: u16, message: String },

    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Chain(e) => e.is_retryable(),
            ServiceError::Storage(_) | ServiceError::SignerUnavailable(_) => true,
            _ => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::UnknownAsset(_) => "UNKNOWN_ASSET",
            ServiceError::UnknownChain(_) => "UNKNOWN_CHAIN",
            ServiceError::NotTracked(_) => "ADDRESS_NOT_TRACKED",
            ServiceError::InvalidRequest(_) => "INVALID_REQUEST",
            ServiceError::Chain(e) => e.error_code(),
            ServiceError::Storage(_) => "STORAGE_ERROR",
            ServiceError::Signer { .. } => "SIGNER_ERROR",
            ServiceError::SignerUnavailable(_) => "SIGNER_UNAVAILABLE",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
