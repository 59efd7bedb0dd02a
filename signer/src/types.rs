//! Request and response types for the signing API
//!
//! The wire types shared with the backend's `SignerClient` come from
//! `custodia::service::rpc`; this module adds the signer-only ones.

use serde::{Deserialize, Serialize};

pub use custodia::service::rpc::{
    AddressRequest, AddressResponse, BootstrapResponse, ErrorResponse, SignTxRequest, SignTxResponse,
};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Network the key store serves
    pub network: String,
    /// Chains this signer can sign for
    pub chains: Vec<String>,
}
