//! Custodia Signing Boundary
//!
//! The only Custodia process that holds private keys. Keys live in an
//! encrypted SQLite file; the backend reaches this server over HTTP to mint
//! deposit addresses and sign withdrawals.
//!
//! # Usage
//!
//! ```bash
//! custodia-signer bootstrap --chain btc --key-db data/keys.db
//! custodia-signer run --bind 127.0.0.1:9400 --key-db data/keys.db
//! ```
//!
//! The key store password is read from `CUSTODIA_SIGNER_PASSWORD`.

pub mod keystore;
pub mod server;
pub mod signing;
pub mod types;

pub use keystore::{EncryptedKeyStore, KeystoreError};
pub use server::{create_router, AppState};
pub use signing::{SigningError, SigningService};
pub use types::*;
