//! Storage Trait Definitions
//!
//! Abstract ledger storage interface. The SQLite implementation is used both
//! in production (file-backed) and in tests (in-memory).

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ChainBlock, LedgerBlock, LedgerStats, OutPointRef, TrackedAddress, UnspentOutput};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What `ingest_block` did with a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No canonical block existed at this height
    Inserted { outputs: usize },
    /// A different canonical block was invalidated and replaced
    Reorged { replaced: String, outputs: usize },
    /// The same block was already canonical; nothing changed
    Unchanged,
}

impl IngestOutcome {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, IngestOutcome::Unchanged)
    }
}

/// Ledger storage interface
///
/// Implementations:
/// - `SqliteLedgerStore` - file-backed for production, in-memory for tests
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start watching an address. Fails with `Duplicate` if (address, asset) exists.
    async fn track_address(&self, address: &TrackedAddress) -> StorageResult<()>;

    /// Whether any asset tracks this address on `chain`
    async fn is_tracked(&self, chain: &str, address: &str) -> StorageResult<bool>;

    async fn tracked_addresses(&self, chain: &str) -> StorageResult<Vec<TrackedAddress>>;

    /// Apply one block atomically: reorg detection, block insert, output
    /// upserts and spend marking all commit together or not at all.
    async fn ingest_block(&self, block: &ChainBlock) -> StorageResult<IngestOutcome>;

    /// The non-reorg block at `height`, if any
    async fn canonical_block(&self, chain: &str, height: u64) -> StorageResult<Option<LedgerBlock>>;

    /// Every block ever recorded at `height`, reorged ones included
    async fn blocks_at(&self, chain: &str, height: u64) -> StorageResult<Vec<LedgerBlock>>;

    /// Highest canonical height
    async fn best_height(&self, chain: &str) -> StorageResult<Option<u64>>;

    /// Selectable outputs (state original, not reorged) owned by `address`
    async fn spendable_outputs(&self, chain: &str, address: &str) -> StorageResult<Vec<UnspentOutput>>;

    async fn output(&self, txid: &str, vout: u32) -> StorageResult<Option<UnspentOutput>>;

    /// original → selected for each outpoint; returns rows changed
    async fn mark_selected(&self, outpoints: &[OutPointRef]) -> StorageResult<usize>;

    async fn stats(&self, chain: &str) -> StorageResult<LedgerStats>;
}
