//! Ledger Synchronization
//!
//! Block notifications arrive on the [`BlockBus`], one named queue per
//! chain. A single [`LedgerSynchronizer`] task per chain drains its queue,
//! fetches blocks through the chain adapter and ingests them into the
//! ledger store, repairing reorgs by walking back from the tip.

pub mod bus;
pub mod poller;
pub mod synchronizer;

use thiserror::Error;

use crate::chain::ChainError;
use crate::storage::StorageError;

pub use bus::{BlockBus, BlockNotification, NotificationPayload};
pub use poller::spawn_tip_poller;
pub use synchronizer::LedgerSynchronizer;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("fetch of block {0} timed out")]
    FetchTimeout(u64),

    #[error("{got} notification delivered to the {expected} synchronizer")]
    ChainMismatch { expected: String, got: String },
}

impl SyncError {
    /// Whether the next notification may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Chain(e) => e.is_retryable(),
            SyncError::Storage(_) | SyncError::FetchTimeout(_) => true,
            SyncError::ChainMismatch { .. } => false,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(SyncError::FetchTimeout(10).is_retryable());
        assert!(SyncError::Chain(ChainError::BlockNotFound(10)).is_retryable());
        assert!(!SyncError::Chain(ChainError::InvalidTransaction("x".into())).is_retryable());
        assert!(!SyncError::ChainMismatch {
            expected: "btc".into(),
            got: "eth".into()
        }
        .is_retryable());
    }
}
