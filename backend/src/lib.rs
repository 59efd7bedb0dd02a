//! Custodia Backend - Multi-Chain Custodial Wallet Services
//!
//! The network-facing half of Custodia. Private keys never live here; every
//! signature is requested from the `custodia-signer` process.
//!
//! ## Components
//!
//! 1. **Chain adapters** - Bitcoin (+ Omni), Ethereum (+ ERC-20), Tron (+ TRC-20)
//! 2. **Ledger store** - tracked addresses, outputs and blocks in SQLite
//! 3. **Ledger synchronizer** - ordered, reorg-aware block ingestion per chain
//! 4. **Wallet service** - deposit addresses and the withdraw pipeline
//! 5. **API** - HTTP ingress for the above

pub mod api;
pub mod chain;
pub mod common;
pub mod service;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports: chain adapters
pub use chain::{
    build_adapter, ChainAdapter, ChainError, ChainInfo, KeyMaterial, KeyVault, MemoryVault, Operator, Query,
    SigningContext, TransferRequest, UnsignedTx, VaultError, Wallet,
};

// Re-exports: configuration and errors
pub use common::{CustodiaConfig, CustodiaError, Network};

// Re-exports: ledger
pub use storage::{LedgerStore, SqliteLedgerStore, StorageError};
pub use sync::{BlockBus, BlockNotification, LedgerSynchronizer};

// Re-exports: services
pub use service::{SignerClient, SigningBoundary, WalletService};
