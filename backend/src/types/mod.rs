//! Shared Types Module
//!
//! Data types shared across the Custodia backend.

pub mod block;
pub mod ledger;
pub mod units;

// Re-exports for convenience
pub use block::{BlockOutput, BlockTx, ChainBlock};
pub use ledger::{LedgerBlock, LedgerStats, OutPointRef, TrackedAddress, UnspentOutput, UtxoState};
pub use units::{format_digits, format_units, parse_units, UnitsError};
