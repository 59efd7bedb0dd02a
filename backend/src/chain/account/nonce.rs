//! Nonce resolution against the node's transaction pool
//!
//! `eth_getTransactionCount(pending)` lags behind transactions that sit in
//! the queued pool, so the next nonce is the larger of that count and one
//! past the highest pooled nonce for the sender.

use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::HashMap;

/// `txpool_content` result: sender → nonce → transaction
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxPoolContent {
    #[serde(default)]
    pub pending: HashMap<String, HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub queued: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl TxPoolContent {
    /// Highest nonce the pool holds for `sender`, if any
    pub fn max_nonce(&self, sender: Address) -> Option<u64> {
        let wanted = format!("{:#x}", sender);

        self.pending
            .iter()
            .chain(self.queued.iter())
            .filter(|(addr, _)| addr.eq_ignore_ascii_case(&wanted))
            .flat_map(|(_, txs)| txs.keys())
            .filter_map(|nonce| nonce.parse::<u64>().ok())
            .max()
    }
}

pub fn resolve_nonce(pending: u64, pool: &TxPoolContent, sender: Address) -> u64 {
    match pool.max_nonce(sender) {
        Some(max) => pending.max(max.saturating_add(1)),
        None => pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Address {
        Address::repeat_byte(0xab)
    }

    fn pool(json: serde_json::Value) -> TxPoolContent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_pool_ahead_of_pending_count() {
        let content = pool(serde_json::json!({
            "pending": {
                "0xABABABABABABABABABABABABABABABABABABABAB": { "5": {}, "6": {} }
            },
            "queued": {}
        }));
        assert_eq!(resolve_nonce(5, &content, sender()), 7);
    }

    #[test]
    fn test_queued_entries_count() {
        let content = pool(serde_json::json!({
            "pending": {},
            "queued": {
                "0xabababababababababababababababababababab": { "9": {} }
            }
        }));
        assert_eq!(resolve_nonce(4, &content, sender()), 10);
    }

    #[test]
    fn test_empty_pool_uses_pending() {
        assert_eq!(resolve_nonce(12, &TxPoolContent::default(), sender()), 12);

        let other = pool(serde_json::json!({
            "pending": { "0x1111111111111111111111111111111111111111": { "40": {} } }
        }));
        assert_eq!(resolve_nonce(12, &other, sender()), 12);
    }

    #[test]
    fn test_pending_count_ahead_of_pool() {
        let content = pool(serde_json::json!({
            "pending": { "0xabababababababababababababababababababab": { "2": {} } }
        }));
        assert_eq!(resolve_nonce(8, &content, sender()), 8);
    }
}
