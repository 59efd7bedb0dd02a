//! Chain-neutral block representation
//!
//! Adapters translate their native block format into `ChainBlock` so the
//! ledger synchronizer is written once for every chain.

use serde::{Deserialize, Serialize};

use super::ledger::OutPointRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub chain: String,
    pub hash: String,
    pub height: u64,
    #[serde(default)]
    pub parent_hash: Option<String>,
    #[serde(default)]
    pub txs: Vec<BlockTx>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTx {
    pub txid: String,
    /// Previous outputs consumed (empty for account chains and coinbase)
    #[serde(default)]
    pub inputs: Vec<OutPointRef>,
    #[serde(default)]
    pub outputs: Vec<BlockOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOutput {
    pub vout: u32,
    /// None for scripts without an address form (OP_RETURN etc.)
    pub address: Option<String>,
    /// Minor units
    pub amount: u128,
}

impl ChainBlock {
    /// Total number of outputs across all transactions
    pub fn output_count(&self) -> usize {
        self.txs.iter().map(|tx| tx.outputs.len()).sum()
    }
}
