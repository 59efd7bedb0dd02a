//! Chain adapters
//!
//! Every supported chain is driven through three narrow traits:
//!
//! - [`Query`]: tip info, balances, blocks by height
//! - [`Operator`]: build unsigned transactions, sign them, broadcast
//! - [`Wallet`]: mint receiving keys into a [`KeyVault`]
//!
//! [`ChainAdapter`] is the union of the three. Variants:
//!
//! - [`utxo::UtxoChain`]: Bitcoin via Esplora, plus the Omni layer
//! - [`account::AccountChain`]: Ethereum and ERC-20 via JSON-RPC
//! - [`resource::ResourceChain`]: Tron and TRC-20 via the HTTP API
//!
//! [`build_adapter`] is the only place that picks a variant.

pub mod account;
pub mod query;
pub mod resource;
pub mod utxo;
pub mod vault;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::common::config::{AssetConfig, ChainConfig, ChainKind, Network};
use crate::types::{ChainBlock, OutPointRef, UnitsError, UnspentOutput};

pub use query::{block, BlockFetch};
pub use vault::{KeyMaterial, KeyVault, MemoryVault, VaultError};

/// Chain adapter errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("address decode error: {0}")]
    AddressDecode(String),

    #[error("fee estimate unavailable: {0}")]
    FeeEstimateUnavailable(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("vault error: {0}")]
    Vault(String),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("node rejected request: {0}")]
    Rejected(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,
}

impl ChainError {
    pub fn rpc(msg: impl std::fmt::Display) -> Self {
        Self::Rpc(msg.to_string())
    }

    /// Transport failures are worth retrying; construction failures are not
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Rpc(_) | ChainError::Http(_) | ChainError::Timeout | ChainError::BlockNotFound(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ChainError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ChainError::AddressDecode(_) => "ADDRESS_DECODE_ERROR",
            ChainError::FeeEstimateUnavailable(_) => "FEE_ESTIMATE_UNAVAILABLE",
            ChainError::InvalidAmount(_) => "INVALID_AMOUNT",
            ChainError::UnsupportedAsset(_) => "UNSUPPORTED_ASSET",
            ChainError::InvalidTransaction(_) => "INVALID_TRANSACTION",
            ChainError::Signing(_) => "SIGNING_ERROR",
            ChainError::Verification(_) => "VERIFICATION_ERROR",
            ChainError::KeyNotFound(_) => "KEY_NOT_FOUND",
            ChainError::Vault(_) => "VAULT_ERROR",
            ChainError::BlockNotFound(_) => "BLOCK_NOT_FOUND",
            ChainError::Rejected(_) => "BROADCAST_REJECTED",
            ChainError::Rpc(_) | ChainError::Http(_) => "RPC_ERROR",
            ChainError::Timeout => "TIMEOUT",
        }
    }
}

impl From<UnitsError> for ChainError {
    fn from(e: UnitsError) -> Self {
        ChainError::InvalidAmount(e.to_string())
    }
}

impl From<VaultError> for ChainError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::NotFound(key) => ChainError::KeyNotFound(key),
            other => ChainError::Vault(other.to_string()),
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// Current tip of a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    pub height: u64,
    pub best_hash: String,
}

/// Input to `Operator::raw_tx`
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    /// Decimal string in whole units of `asset`
    pub amount: String,
    pub memo: Option<String>,
    pub asset: AssetConfig,
    /// Candidate outputs loaded from the ledger (empty for account chains)
    pub utxos: Vec<UnspentOutput>,
}

/// An unsigned transaction ready for the signing boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTx {
    pub hex: String,
    /// Sum of selected inputs (UTXO chains) or the transferred value
    pub vin_amount: u128,
    pub fee: u128,
    /// Ledger outputs consumed; empty for account chains
    pub selected: Vec<OutPointRef>,
}

/// Per-call signing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningContext {
    /// EIP-155 chain id (account chains; ignored elsewhere)
    pub chain_id: u64,
    pub from_address: String,
    pub vin_amount: u128,
}

/// Read access to a chain
#[async_trait]
pub trait Query: Send + Sync {
    /// Ledger tag / routing key
    fn chain(&self) -> &str;

    async fn ledger(&self) -> ChainResult<ChainInfo>;

    /// Balance of `account` as a decimal string. `contract` selects an Omni
    /// property or token contract; `None` means the native coin.
    async fn balance(&self, account: &str, symbol: &str, contract: Option<&str>) -> ChainResult<String>;

    async fn fetch_block(&self, height: u64) -> ChainResult<ChainBlock>;
}

/// Transaction construction, signing and submission
#[async_trait]
pub trait Operator: Send + Sync {
    async fn raw_tx(&self, request: &TransferRequest) -> ChainResult<UnsignedTx>;

    /// Sign `unsigned_hex` with `key` and verify the result before returning it
    fn signed_tx(&self, unsigned_hex: &str, key: &KeyMaterial, ctx: &SigningContext) -> ChainResult<String>;

    /// Submit a signed transaction; returns its txid
    async fn broadcast_tx(&self, signed_hex: &str) -> ChainResult<String>;
}

/// Receiving key management
pub trait Wallet: Send + Sync {
    /// Derive or generate a key, persist it in `vault`, return only the address
    fn create(&self, vault: &mut dyn KeyVault) -> ChainResult<String>;

    /// Vault key under which the private material for `address` lives
    fn key_id(&self, address: &str) -> ChainResult<String>;

    /// One-time per-chain setup (seed generation); idempotent
    fn bootstrap(&self, _vault: &mut dyn KeyVault) -> ChainResult<()> {
        Ok(())
    }
}

pub trait ChainAdapter: Query + Operator + Wallet {}

impl<T: Query + Operator + Wallet> ChainAdapter for T {}

/// Build the adapter for one configured chain
pub fn build_adapter(config: &ChainConfig, network: Network) -> ChainResult<Arc<dyn ChainAdapter>> {
    let adapter: Arc<dyn ChainAdapter> = match config.kind {
        ChainKind::Utxo => Arc::new(utxo::UtxoChain::new(config, network)?),
        ChainKind::Account => Arc::new(account::AccountChain::new(config)?),
        ChainKind::Resource => Arc::new(resource::ResourceChain::new(config)?),
    };

    tracing::info!(
        target: "custodia::chain",
        chain = %config.tag,
        kind = ?config.kind,
        endpoint = %config.endpoint,
        "chain adapter ready"
    );

    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ChainError::Timeout.is_retryable());
        assert!(ChainError::rpc("connection reset").is_retryable());
        assert!(!ChainError::FeeEstimateUnavailable("no target".into()).is_retryable());
        assert!(!ChainError::InsufficientFunds {
            required: "2".into(),
            available: "1".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_vault_error_mapping() {
        let err: ChainError = VaultError::NotFound("eth/0xabc".into()).into();
        assert!(matches!(err, ChainError::KeyNotFound(_)));
        assert_eq!(err.error_code(), "KEY_NOT_FOUND");
    }

    #[test]
    fn test_build_adapter_for_each_kind() {
        let network = Network::Regtest;
        for (tag, kind, endpoint) in [
            ("btc", ChainKind::Utxo, network.default_esplora()),
            ("eth", ChainKind::Account, network.default_eth_rpc()),
            ("trx", ChainKind::Resource, network.default_tron_api()),
        ] {
            let config = ChainConfig {
                tag: tag.to_string(),
                kind,
                endpoint: endpoint.to_string(),
                aux_endpoint: None,
                chain_id: 1337,
                fee_target: 6,
                decimals: 8,
            };
            let adapter = build_adapter(&config, network).unwrap();
            assert_eq!(adapter.chain(), tag);
        }
    }
}
