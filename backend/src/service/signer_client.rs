//! Client side of the signing boundary

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use super::rpc::{AddressRequest, AddressResponse, ErrorResponse, SignTxRequest, SignTxResponse};
use super::{ServiceError, ServiceResult};

const SIGNER_TIMEOUT: Duration = Duration::from_secs(60);

/// The only way the network-facing service touches keys
#[async_trait]
pub trait SigningBoundary: Send + Sync {
    /// Mint and persist a key for `asset`; only the address comes back
    async fn new_address(&self, asset: &str) -> ServiceResult<AddressResponse>;

    async fn sign_tx(&self, request: &SignTxRequest) -> ServiceResult<String>;
}

/// HTTP client for the signer process
pub struct SignerClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl SignerClient {
    pub fn new(base_url: &str) -> ServiceResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(SIGNER_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::SignerUnavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> ServiceResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let resp = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::SignerUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = match resp.json::<ErrorResponse>().await {
                Ok(err) => format!("{}: {}", err.code, err.error),
                Err(_) => status.to_string(),
            };
            return Err(ServiceError::Signer {
                status: status.as_u16(),
                message,
            });
        }

        resp.json()
            .await
            .map_err(|e| ServiceError::SignerUnavailable(format!("malformed signer response: {}", e)))
    }

    /// `GET /health`
    pub async fn health(&self) -> ServiceResult<bool> {
        let resp = self
            .http_client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| ServiceError::SignerUnavailable(e.to_string()))?;
        Ok(resp.status().is_success())
    }
}

#[async_trait]
impl SigningBoundary for SignerClient {
    async fn new_address(&self, asset: &str) -> ServiceResult<AddressResponse> {
        self.post(
            "/address",
            &AddressRequest {
                asset: asset.to_string(),
            },
        )
        .await
    }

    async fn sign_tx(&self, request: &SignTxRequest) -> ServiceResult<String> {
        let resp: SignTxResponse = self.post("/sign", request).await?;
        Ok(resp.signed_hex)
    }
}
