//! Ledger Types
//!
//! Records owned by the ledger store: tracked deposit addresses, the
//! unspent outputs paying them, and the blocks they were seen in.

use serde::{Deserialize, Serialize};

/// Lifecycle of a ledger output: original → selected → spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtxoState {
    /// Received and untouched
    Original,
    /// Used as an input of a broadcast withdrawal
    Selected,
    /// Seen spent in an ingested block
    Spent,
}

impl Default for UtxoState {
    fn default() -> Self {
        Self::Original
    }
}

impl std::fmt::Display for UtxoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Original => "original",
            Self::Selected => "selected",
            Self::Spent => "spent",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for UtxoState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Self::Original),
            "selected" => Ok(Self::Selected),
            "spent" => Ok(Self::Spent),
            _ => Err(format!("unknown utxo state: {}", s)),
        }
    }
}

/// A deposit address the ledger watches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAddress {
    pub address: String,
    pub asset: String,
    pub chain: String,
    /// Unix timestamp
    pub created_at: u64,
}

impl TrackedAddress {
    pub fn new(address: impl Into<String>, asset: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            asset: asset.into(),
            chain: chain.into(),
            created_at: chrono::Utc::now().timestamp().max(0) as u64,
        }
    }
}

/// Reference to a transaction output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPointRef {
    pub txid: String,
    pub vout: u32,
}

impl OutPointRef {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self { txid: txid.into(), vout }
    }
}

impl std::fmt::Display for OutPointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// An output paying a tracked address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub txid: String,
    pub vout: u32,
    /// Minor units
    pub amount: u128,
    /// Height of the block that created it
    pub height: u64,
    pub state: UtxoState,
    /// Set when the creating block was invalidated
    pub reorg: bool,
    pub address: String,
    pub chain: String,
    pub block_hash: String,
    /// Block that spent it, while `state == Spent`
    pub spent_block_hash: Option<String>,
}

impl UnspentOutput {
    pub fn outpoint(&self) -> OutPointRef {
        OutPointRef::new(self.txid.clone(), self.vout)
    }

    /// Only untouched, canonical outputs may be chosen as inputs
    pub fn is_selectable(&self) -> bool {
        !self.reorg && self.state == UtxoState::Original
    }

    /// Confirmations relative to `tip_height`; the including block counts as one
    pub fn confirmations(&self, tip_height: u64) -> u64 {
        if tip_height < self.height {
            0
        } else {
            tip_height - self.height + 1
        }
    }
}

/// A block the ledger has ingested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBlock {
    pub hash: String,
    pub height: u64,
    pub chain: String,
    pub reorg: bool,
}

/// Per-chain ledger summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub best_height: Option<u64>,
    pub blocks: u64,
    pub reorged_blocks: u64,
    pub tracked_addresses: u64,
    pub original: u64,
    pub selected: u64,
    pub spent: u64,
    pub reorged_outputs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(height: u64, state: UtxoState, reorg: bool) -> UnspentOutput {
        UnspentOutput {
            txid: "aa".repeat(32),
            vout: 1,
            amount: 50_000,
            height,
            state,
            reorg,
            address: "mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef".to_string(),
            chain: "btc".to_string(),
            block_hash: "bb".repeat(32),
            spent_block_hash: None,
        }
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [UtxoState::Original, UtxoState::Selected, UtxoState::Spent] {
            assert_eq!(state.to_string().parse::<UtxoState>().unwrap(), state);
        }
        assert!("burned".parse::<UtxoState>().is_err());
    }

    #[test]
    fn test_selectable() {
        assert!(output(10, UtxoState::Original, false).is_selectable());
        assert!(!output(10, UtxoState::Original, true).is_selectable());
        assert!(!output(10, UtxoState::Selected, false).is_selectable());
        assert!(!output(10, UtxoState::Spent, false).is_selectable());
    }

    #[test]
    fn test_confirmations() {
        let utxo = output(100, UtxoState::Original, false);
        assert_eq!(utxo.confirmations(100), 1);
        assert_eq!(utxo.confirmations(105), 6);
        assert_eq!(utxo.confirmations(99), 0);
    }

    #[test]
    fn test_outpoint_display() {
        let utxo = output(1, UtxoState::Original, false);
        assert_eq!(utxo.outpoint().to_string(), format!("{}:1", "aa".repeat(32)));
    }
}
