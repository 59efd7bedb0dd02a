//! Storage Layer Module
//!
//! Persistence for the UTXO ledger: tracked addresses, unspent outputs and
//! ingested blocks.

pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use sqlite::SqliteLedgerStore;
pub use traits::{IngestOutcome, LedgerStore, StorageError, StorageResult};
