//! Signing service
//!
//! Mints receiving keys and signs transactions. The key store is opened for
//! each request and closed when the request finishes; a mutex keeps requests
//! from interleaving on the store file.

use custodia::chain::{build_adapter, ChainAdapter, ChainError, KeyVault, Operator, SigningContext, Wallet};
use custodia::common::config::{AssetConfig, ChainConfig, Network};
use custodia::common::logging::log_signing_event;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::keystore::{EncryptedKeyStore, KeystoreError};
use crate::types::{AddressResponse, BootstrapResponse, SignTxRequest};

/// Signing errors
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("unknown asset: {0}")]
    UnknownAsset(String),
    #[error("unknown chain: {0}")]
    UnknownChain(String),
    #[error("no key for address {0}")]
    KeyNotFound(String),
    #[error("key store error: {0}")]
    Keystore(#[from] KeystoreError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl SigningError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SigningError::UnknownAsset(_) => "UNKNOWN_ASSET",
            SigningError::UnknownChain(_) => "UNKNOWN_CHAIN",
            SigningError::KeyNotFound(_) => "KEY_NOT_FOUND",
            SigningError::Keystore(KeystoreError::InvalidPassword) => "INVALID_PASSWORD",
            SigningError::Keystore(_) => "KEYSTORE_ERROR",
            SigningError::Chain(e) => e.error_code(),
        }
    }
}

pub struct SigningService {
    key_db: PathBuf,
    password: Zeroizing<String>,
    network: Network,
    assets: Vec<AssetConfig>,
    chains: BTreeMap<String, Arc<dyn ChainAdapter>>,
    store_lock: Mutex<()>,
}

impl SigningService {
    /// Build the service and check that `password` opens the key store
    pub fn new(
        key_db: impl Into<PathBuf>,
        password: String,
        network: Network,
        chains: &[ChainConfig],
        assets: Vec<AssetConfig>,
    ) -> Result<Self, SigningError> {
        let mut adapters = BTreeMap::new();
        for chain in chains {
            adapters.insert(chain.tag.clone(), build_adapter(chain, network)?);
        }

        let service = Self {
            key_db: key_db.into(),
            password: Zeroizing::new(password),
            network,
            assets,
            chains: adapters,
            store_lock: Mutex::new(()),
        };
        service.open_store()?;

        Ok(service)
    }

    fn open_store(&self) -> Result<EncryptedKeyStore, KeystoreError> {
        EncryptedKeyStore::open(&self.key_db, &self.password)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn chain_tags(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    fn asset(&self, symbol: &str) -> Result<&AssetConfig, SigningError> {
        self.assets
            .iter()
            .find(|a| a.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| SigningError::UnknownAsset(symbol.to_string()))
    }

    fn adapter(&self, chain: &str) -> Result<&Arc<dyn ChainAdapter>, SigningError> {
        self.chains
            .get(chain)
            .ok_or_else(|| SigningError::UnknownChain(chain.to_string()))
    }

    /// Mint a receiving address for `symbol`'s chain
    pub async fn new_address(&self, symbol: &str) -> Result<AddressResponse, SigningError> {
        let asset = self.asset(symbol)?;
        let adapter = self.adapter(&asset.chain)?;

        let _guard = self.store_lock.lock().await;
        let mut store = self.open_store()?;
        let address = adapter.create(&mut store as &mut dyn KeyVault)?;

        log_signing_event("address_created", &asset.symbol, &address, true, None);

        Ok(AddressResponse {
            address,
            asset: asset.symbol.clone(),
            chain: asset.chain.clone(),
        })
    }

    /// Sign an unsigned transaction with the key held for `request.from`
    pub async fn sign(&self, request: &SignTxRequest) -> Result<String, SigningError> {
        let asset = self.asset(&request.asset)?;
        let adapter = self.adapter(&asset.chain)?;
        let key_id = adapter.key_id(&request.from)?;

        let key = {
            let _guard = self.store_lock.lock().await;
            let store = self.open_store()?;
            match store.load(&key_id) {
                Ok(key) => key,
                Err(KeystoreError::KeyNotFound(_)) => {
                    log_signing_event("sign_refused", &asset.symbol, &request.from, false, Some("unknown key"));
                    return Err(SigningError::KeyNotFound(request.from.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        };

        let ctx = SigningContext {
            chain_id: request.chain_id,
            from_address: request.from.clone(),
            vin_amount: request.vin_amount,
        };

        match adapter.signed_tx(&request.unsigned_hex, &key, &ctx) {
            Ok(signed) => {
                log_signing_event("transaction_signed", &asset.symbol, &request.from, true, None);
                Ok(signed)
            }
            Err(e) => {
                log_signing_event("sign_failed", &asset.symbol, &request.from, false, Some(&e.to_string()));
                Err(e.into())
            }
        }
    }

    /// One-time chain setup, then a first receiving address
    pub async fn bootstrap(&self, chain: &str) -> Result<BootstrapResponse, SigningError> {
        let adapter = self.adapter(chain)?;

        let _guard = self.store_lock.lock().await;
        let mut store = self.open_store()?;
        adapter.bootstrap(&mut store as &mut dyn KeyVault)?;
        let address = adapter.create(&mut store as &mut dyn KeyVault)?;

        tracing::info!(chain = %chain, address = %address, "Chain wallet bootstrapped");

        Ok(BootstrapResponse {
            chain: chain.to_string(),
            address,
        })
    }
}
