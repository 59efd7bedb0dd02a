//! Tron full-node HTTP API client
//!
//! All calls are `POST /wallet/<method>` with `visible: true` so addresses
//! travel in base58 form.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::fees::{AccountResources, ResourcePrices};
use crate::chain::{ChainError, ChainResult};

/// A node-built transaction, kept as JSON so it round-trips to broadcast unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TronTransaction {
    #[serde(rename = "txID")]
    pub tx_id: String,
    pub raw_data: Value,
    pub raw_data_hex: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature: Vec<String>,
    #[serde(default)]
    pub visible: bool,
}

impl TronTransaction {
    pub fn to_hex(&self) -> ChainResult<String> {
        let bytes = serde_json::to_vec(self).map_err(|e| ChainError::InvalidTransaction(e.to_string()))?;
        Ok(hex::encode(bytes))
    }

    pub fn from_hex(s: &str) -> ChainResult<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| ChainError::InvalidTransaction(format!("hex: {}", e)))?;
        serde_json::from_slice(&bytes).map_err(|e| ChainError::InvalidTransaction(format!("json: {}", e)))
    }

    /// First contract entry of raw_data
    pub fn contract(&self) -> ChainResult<&Value> {
        self.raw_data
            .get("contract")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ChainError::InvalidTransaction("transaction has no contract".to_string()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TronAccount {
    #[serde(default)]
    pub balance: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TronBlock {
    #[serde(rename = "blockID")]
    pub block_id: String,
    pub block_header: BlockHeader,
    #[serde(default)]
    pub transactions: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub raw_data: BlockHeaderRaw,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeaderRaw {
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub parent_hash: Option<String>,
}

/// Result of a read-only contract call
#[derive(Debug, Clone, Default)]
pub struct ConstantCall {
    pub output: Vec<u8>,
    pub energy_used: u64,
}

#[derive(Debug, Clone)]
pub struct TronClient {
    client: Client,
    base_url: String,
}

impl TronClient {
    pub fn new(base_url: &str, timeout: Duration) -> ChainResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, method: &str, body: Value) -> ChainResult<Value> {
        let url = format!("{}/wallet/{}", self.base_url, method);
        let resp = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ChainError::Timeout
            } else {
                ChainError::Http(e)
            }
        })?;

        if !resp.status().is_success() {
            return Err(ChainError::rpc(format!("{} returned {}", method, resp.status())));
        }

        let value: Value = resp.json().await?;
        if let Some(err) = value.get("Error").and_then(Value::as_str) {
            return Err(ChainError::rpc(format!("{}: {}", method, err)));
        }
        Ok(value)
    }

    pub async fn now_block(&self) -> ChainResult<TronBlock> {
        let value = self.post("getnowblock", json!({ "visible": true })).await?;
        serde_json::from_value(value).map_err(|e| ChainError::rpc(format!("getnowblock: {}", e)))
    }

    pub async fn block_by_num(&self, height: u64) -> ChainResult<TronBlock> {
        let value = self
            .post("getblockbynum", json!({ "num": height, "visible": true }))
            .await?;
        if value.get("blockID").is_none() {
            return Err(ChainError::BlockNotFound(height));
        }
        serde_json::from_value(value).map_err(|e| ChainError::rpc(format!("getblockbynum: {}", e)))
    }

    /// Unactivated accounts come back as `{}` and read as a zero balance
    pub async fn account(&self, address: &str) -> ChainResult<TronAccount> {
        let value = self
            .post("getaccount", json!({ "address": address, "visible": true }))
            .await?;
        serde_json::from_value(value).map_err(|e| ChainError::rpc(format!("getaccount: {}", e)))
    }

    pub async fn account_resources(&self, address: &str) -> ChainResult<AccountResources> {
        let value = self
            .post("getaccountresource", json!({ "address": address, "visible": true }))
            .await?;
        serde_json::from_value(value).map_err(|e| ChainError::rpc(format!("getaccountresource: {}", e)))
    }

    /// Per-byte and per-energy burn prices, falling back to defaults for missing keys
    pub async fn resource_prices(&self) -> ChainResult<ResourcePrices> {
        let value = self.post("getchainparameters", json!({})).await?;
        let mut prices = ResourcePrices::default();

        for param in value
            .get("chainParameter")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let amount = param.get("value").and_then(Value::as_u64);
            match (param.get("key").and_then(Value::as_str), amount) {
                (Some("getTransactionFee"), Some(v)) => prices.sun_per_byte = v,
                (Some("getEnergyFee"), Some(v)) => prices.sun_per_energy = v,
                _ => {}
            }
        }
        Ok(prices)
    }

    pub async fn create_transaction(
        &self,
        owner: &str,
        to: &str,
        amount: u64,
        memo: Option<&str>,
    ) -> ChainResult<TronTransaction> {
        let mut body = json!({
            "owner_address": owner,
            "to_address": to,
            "amount": amount,
            "visible": true,
        });
        if let Some(memo) = memo {
            body["extra_data"] = Value::String(hex::encode(memo.as_bytes()));
        }

        let value = self.post("createtransaction", body).await?;
        serde_json::from_value(value).map_err(|e| ChainError::rpc(format!("createtransaction: {}", e)))
    }

    pub async fn trigger_smart_contract(
        &self,
        owner: &str,
        contract: &str,
        selector: &str,
        parameter: &str,
        fee_limit: u64,
    ) -> ChainResult<TronTransaction> {
        let value = self
            .post(
                "triggersmartcontract",
                json!({
                    "owner_address": owner,
                    "contract_address": contract,
                    "function_selector": selector,
                    "parameter": parameter,
                    "fee_limit": fee_limit,
                    "call_value": 0,
                    "visible": true,
                }),
            )
            .await?;

        check_call_result("triggersmartcontract", &value)?;
        let tx = value
            .get("transaction")
            .cloned()
            .ok_or_else(|| ChainError::rpc("triggersmartcontract returned no transaction"))?;
        serde_json::from_value(tx).map_err(|e| ChainError::rpc(format!("triggersmartcontract: {}", e)))
    }

    pub async fn trigger_constant(
        &self,
        owner: &str,
        contract: &str,
        selector: &str,
        parameter: &str,
    ) -> ChainResult<ConstantCall> {
        let value = self
            .post(
                "triggerconstantcontract",
                json!({
                    "owner_address": owner,
                    "contract_address": contract,
                    "function_selector": selector,
                    "parameter": parameter,
                    "visible": true,
                }),
            )
            .await?;

        check_call_result("triggerconstantcontract", &value)?;
        let output = value
            .get("constant_result")
            .and_then(|r| r.get(0))
            .and_then(Value::as_str)
            .map(hex::decode)
            .transpose()
            .map_err(|e| ChainError::rpc(format!("triggerconstantcontract: {}", e)))?
            .unwrap_or_default();

        Ok(ConstantCall {
            output,
            energy_used: value.get("energy_used").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    /// Returns the txid on acceptance
    pub async fn broadcast(&self, tx: &TronTransaction) -> ChainResult<String> {
        let body = serde_json::to_value(tx).map_err(|e| ChainError::InvalidTransaction(e.to_string()))?;
        let value = self.post("broadcasttransaction", body).await?;

        if value.get("result").and_then(Value::as_bool) == Some(true) {
            return Ok(value
                .get("txid")
                .and_then(Value::as_str)
                .unwrap_or(&tx.tx_id)
                .to_string());
        }
        Err(ChainError::Rejected(node_message(&value)))
    }
}

fn check_call_result(method: &str, value: &Value) -> ChainResult<()> {
    let result = value.get("result");
    if result.and_then(|r| r.get("result")).and_then(Value::as_bool) == Some(true) {
        return Ok(());
    }
    Err(ChainError::rpc(format!("{}: {}", method, result.map(node_message).unwrap_or_default())))
}

/// Node messages are hex-encoded UTF-8
fn node_message(value: &Value) -> String {
    let code = value.get("code").and_then(Value::as_str).unwrap_or("UNKNOWN");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .map(|m| {
            hex::decode(m)
                .ok()
                .and_then(|b| String::from_utf8(b).ok())
                .unwrap_or_else(|| m.to_string())
        })
        .unwrap_or_default();
    format!("{} {}", code, message).trim().to_string()
}
