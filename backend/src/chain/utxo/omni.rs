//! Omni layer support
//!
//! Omni "simple send" transfers ride on an ordinary Bitcoin transaction: a
//! null-data output carries the payload and the destination receives a
//! small reference output. Balances come from an Omni Core node.

use bitcoin::script::PushBytesBuf;
use bitcoin::ScriptBuf;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::chain::{ChainError, ChainResult};

/// Payload prefix
pub const OMNI_MAGIC: &[u8; 4] = b"omni";

/// Transaction type 0: simple send
pub const SIMPLE_SEND: u16 = 0;

/// Encoded payload size: magic + version + type + property + amount
pub const PAYLOAD_LEN: usize = 4 + 2 + 2 + 4 + 8;

/// An Omni simple send of `amount` units of `property_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleSend {
    pub version: u16,
    pub property_id: u32,
    pub amount: u64,
}

impl SimpleSend {
    pub fn new(property_id: u32, amount: u64) -> Self {
        Self {
            version: 0,
            property_id,
            amount,
        }
    }

    /// Big-endian payload bytes
    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out[0..4].copy_from_slice(OMNI_MAGIC);
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&SIMPLE_SEND.to_be_bytes());
        out[8..12].copy_from_slice(&self.property_id.to_be_bytes());
        out[12..20].copy_from_slice(&self.amount.to_be_bytes());
        out
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() != PAYLOAD_LEN || &payload[0..4] != OMNI_MAGIC {
            return None;
        }

        let tx_type = u16::from_be_bytes([payload[6], payload[7]]);
        if tx_type != SIMPLE_SEND {
            return None;
        }

        Some(Self {
            version: u16::from_be_bytes([payload[4], payload[5]]),
            property_id: u32::from_be_bytes(payload[8..12].try_into().ok()?),
            amount: u64::from_be_bytes(payload[12..20].try_into().ok()?),
        })
    }

    /// OP_RETURN script carrying the payload
    pub fn marker_script(&self) -> ChainResult<ScriptBuf> {
        let push = PushBytesBuf::try_from(self.encode().to_vec())
            .map_err(|e| ChainError::InvalidTransaction(e.to_string()))?;
        Ok(ScriptBuf::new_op_return(&push))
    }

    /// Parse an OP_RETURN marker script
    pub fn from_script(script: &bitcoin::Script) -> Option<Self> {
        let bytes = script.as_bytes();
        // OP_RETURN, direct push of PAYLOAD_LEN bytes, payload
        if bytes.len() != 2 + PAYLOAD_LEN || bytes[0] != 0x6a || bytes[1] as usize != PAYLOAD_LEN {
            return None;
        }
        Self::decode(&bytes[2..])
    }
}

/// Omni Core JSON-RPC client (balances only)
#[derive(Debug, Clone)]
pub struct OmniClient {
    client: Client,
    url: String,
    auth: Option<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct OmniBalance {
    balance: String,
}

impl OmniClient {
    /// `endpoint` may carry `user:password@` credentials
    pub fn new(endpoint: &str, timeout: Duration) -> ChainResult<Self> {
        let mut url = url::Url::parse(endpoint)
            .map_err(|e| ChainError::rpc(format!("invalid Omni RPC URL: {}", e)))?;

        let auth = if url.username().is_empty() {
            None
        } else {
            Some((
                url.username().to_string(),
                url.password().unwrap_or_default().to_string(),
            ))
        };
        // Credentials travel in the Authorization header only
        let _ = url.set_username("");
        let _ = url.set_password(None);

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
            auth,
        })
    }

    /// Balance of `property_id` held by `address`, as Omni Core's decimal string
    pub async fn get_balance(&self, address: &str, property_id: u32) -> ChainResult<String> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "custodia",
            "method": "omni_getbalance",
            "params": [address, property_id],
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }

        let resp: RpcResponse<OmniBalance> = request.send().await?.json().await?;
        if let Some(err) = resp.error {
            return Err(ChainError::rpc(format!("omni_getbalance {}: {}", err.code, err.message)));
        }

        resp.result
            .map(|b| b.balance)
            .ok_or_else(|| ChainError::rpc("omni_getbalance returned no result"))
    }
}
