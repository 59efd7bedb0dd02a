//! Esplora REST client for the UTXO chain
//!
//! Covers what the adapter needs: tip, blocks by height (raw, decoded with
//! `bitcoin::consensus`), fee estimates, address balances and broadcast.

use bitcoin::Block;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Esplora HTTP client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    /// Create a new client; every request is bounded by `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EsploraError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, path: &str) -> Result<String, EsploraError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EsploraError::NotFound(path.to_string()));
        }
        if !resp.status().is_success() {
            return Err(EsploraError::Status(resp.status().as_u16(), path.to_string()));
        }

        Ok(resp.text().await?)
    }

    /// Get current block height
    pub async fn get_block_height(&self) -> Result<u64, EsploraError> {
        self.get_text("/blocks/tip/height")
            .await?
            .trim()
            .parse()
            .map_err(|_| EsploraError::ParseError("Failed to parse block height".to_string()))
    }

    /// Hash of the block at `height` on the node's best chain
    pub async fn get_block_hash(&self, height: u64) -> Result<String, EsploraError> {
        Ok(self
            .get_text(&format!("/block-height/{}", height))
            .await?
            .trim()
            .to_string())
    }

    /// Full block by hash
    pub async fn get_block(&self, hash: &str) -> Result<Block, EsploraError> {
        let url = format!("{}/block/{}/raw", self.base_url, hash);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(EsploraError::NotFound(format!("block {}", hash)));
        }

        let bytes = resp.bytes().await?;
        bitcoin::consensus::deserialize(&bytes)
            .map_err(|e| EsploraError::ParseError(format!("block {}: {}", hash, e)))
    }

    /// Fee estimates in sat/vB keyed by confirmation target
    pub async fn get_fee_estimates(&self) -> Result<HashMap<String, f64>, EsploraError> {
        let url = format!("{}/fee-estimates", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(EsploraError::Status(resp.status().as_u16(), "/fee-estimates".to_string()));
        }

        Ok(resp.json().await?)
    }

    /// Confirmed plus mempool balance of an address, in satoshis
    pub async fn get_address_balance(&self, address: &str) -> Result<u64, EsploraError> {
        let url = format!("{}/address/{}", self.base_url, address);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(EsploraError::Status(resp.status().as_u16(), format!("/address/{}", address)));
        }

        let info: AddressInfo = resp.json().await?;
        Ok(info.chain_stats.balance() + info.mempool_stats.balance())
    }

    /// Broadcast a raw transaction
    pub async fn broadcast_tx(&self, tx_hex: &str) -> Result<String, EsploraError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self.client.post(&url).body(tx_hex.to_string()).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(EsploraError::BroadcastFailed(error_text));
        }

        Ok(resp.text().await?.trim().to_string())
    }
}

/// Pick the fee rate for `target` blocks: the exact target if present,
/// otherwise the closest slower target.
pub fn pick_fee_rate(estimates: &HashMap<String, f64>, target: u16) -> Option<f64> {
    let mut targets: Vec<(u16, f64)> = estimates
        .iter()
        .filter_map(|(k, v)| k.parse::<u16>().ok().map(|t| (t, *v)))
        .filter(|(_, rate)| rate.is_finite() && *rate > 0.0)
        .collect();
    targets.sort_by_key(|(t, _)| *t);

    targets
        .iter()
        .find(|(t, _)| *t >= target)
        .map(|(_, rate)| *rate)
}

#[derive(Debug, Clone, Deserialize)]
struct AddressInfo {
    chain_stats: AddressStats,
    mempool_stats: AddressStats,
}

#[derive(Debug, Clone, Deserialize)]
struct AddressStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

impl AddressStats {
    fn balance(&self) -> u64 {
        self.funded_txo_sum.saturating_sub(self.spent_txo_sum)
    }
}

/// Esplora error types
#[derive(Debug, thiserror::Error)]
pub enum EsploraError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected status {0} for {1}")]
    Status(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_url_normalized() {
        let client = EsploraClient::new("https://blockstream.info/api/", Duration::from_secs(60)).unwrap();
        assert_eq!(client.base_url(), "https://blockstream.info/api");
    }

    #[test]
    fn test_pick_fee_rate() {
        let estimates: HashMap<String, f64> = [("1", 30.5), ("3", 20.0), ("6", 12.0), ("144", 2.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        assert_eq!(pick_fee_rate(&estimates, 6), Some(12.0));
        assert_eq!(pick_fee_rate(&estimates, 4), Some(12.0));
        assert_eq!(pick_fee_rate(&estimates, 1), Some(30.5));
        assert_eq!(pick_fee_rate(&estimates, 500), None);
        assert_eq!(pick_fee_rate(&HashMap::new(), 6), None);
    }

    #[test]
    fn test_address_stats_balance() {
        let info: AddressInfo = serde_json::from_str(
            r#"{
                "address": "mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef",
                "chain_stats": {"funded_txo_count": 2, "funded_txo_sum": 150000, "spent_txo_count": 1, "spent_txo_sum": 50000, "tx_count": 3},
                "mempool_stats": {"funded_txo_count": 1, "funded_txo_sum": 1000, "spent_txo_count": 0, "spent_txo_sum": 0, "tx_count": 1}
            }"#,
        )
        .unwrap();
        assert_eq!(info.chain_stats.balance() + info.mempool_stats.balance(), 101_000);
    }
}
