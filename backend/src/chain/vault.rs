//! Key vault abstraction used by `Wallet::create` and the signing boundary
//!
//! Entries are append-only: a key is written at most once and never
//! overwritten. The signer backs this with an encrypted SQLite file; tests
//! use `MemoryVault`.

use std::collections::BTreeMap;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("vault backend error: {0}")]
    Backend(String),
}

/// Secret bytes that are wiped from memory on drop
#[derive(Clone)]
pub struct KeyMaterial(Zeroizing<Vec<u8>>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial([REDACTED; {}])", self.0.len())
    }
}

/// Append-only key/value store for private key material
pub trait KeyVault: Send {
    /// Store `material` under `key`. Fails with `AlreadyExists` if present.
    fn insert(&mut self, key: &str, material: &[u8]) -> Result<(), VaultError>;

    fn get(&self, key: &str) -> Result<KeyMaterial, VaultError>;

    fn contains(&self, key: &str) -> Result<bool, VaultError>;

    /// Number of keys starting with `prefix`
    fn count_prefix(&self, prefix: &str) -> Result<u64, VaultError>;
}

/// In-memory vault for tests and offline tooling
#[derive(Default)]
pub struct MemoryVault {
    entries: BTreeMap<String, Zeroizing<Vec<u8>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyVault for MemoryVault {
    fn insert(&mut self, key: &str, material: &[u8]) -> Result<(), VaultError> {
        if self.entries.contains_key(key) {
            return Err(VaultError::AlreadyExists(key.to_string()));
        }
        self.entries
            .insert(key.to_string(), Zeroizing::new(material.to_vec()));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<KeyMaterial, VaultError> {
        self.entries
            .get(key)
            .map(|bytes| KeyMaterial::new(bytes.to_vec()))
            .ok_or_else(|| VaultError::NotFound(key.to_string()))
    }

    fn contains(&self, key: &str) -> Result<bool, VaultError> {
        Ok(self.entries.contains_key(key))
    }

    fn count_prefix(&self, prefix: &str) -> Result<u64, VaultError> {
        Ok(self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_only() {
        let mut vault = MemoryVault::new();
        vault.insert("btc:addr", b"secret").unwrap();

        let again = vault.insert("btc:addr", b"other");
        assert!(matches!(again, Err(VaultError::AlreadyExists(_))));
        assert_eq!(vault.get("btc:addr").unwrap().as_bytes(), b"secret");
    }

    #[test]
    fn test_missing_key() {
        let vault = MemoryVault::new();
        assert!(matches!(vault.get("nope"), Err(VaultError::NotFound(_))));
        assert!(!vault.contains("nope").unwrap());
    }

    #[test]
    fn test_count_prefix() {
        let mut vault = MemoryVault::new();
        vault.insert("btc/path/0", b"a").unwrap();
        vault.insert("btc/path/1", b"b").unwrap();
        vault.insert("btc/seed", b"c").unwrap();
        vault.insert("eth/0xabc", b"d").unwrap();

        assert_eq!(vault.count_prefix("btc/path/").unwrap(), 2);
        assert_eq!(vault.count_prefix("btc/").unwrap(), 3);
        assert_eq!(vault.count_prefix("trx/").unwrap(), 0);
    }

    #[test]
    fn test_debug_redacts() {
        let material = KeyMaterial::new(vec![0x42; 32]);
        let rendered = format!("{:?}", material);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("42"));
    }
}
