//! Encrypted key record storage
//!
//! Key records live in a SQLite file. Each record is sealed with AES-256-GCM
//! under a password-derived key; only record ids are stored in the clear.
//! A check record written at creation time detects a wrong password before
//! any key is touched.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use custodia::chain::{KeyMaterial, KeyVault, VaultError};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zeroize::Zeroizing;

const CHECK_PLAINTEXT: &[u8] = b"custodia-keystore-check";

/// Key store errors
#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("decryption error: {0}")]
    Decryption(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("key already exists: {0}")]
    KeyExists(String),
    #[error("invalid password")]
    InvalidPassword,
}

impl From<KeystoreError> for VaultError {
    fn from(e: KeystoreError) -> Self {
        match e {
            KeystoreError::KeyNotFound(id) => VaultError::NotFound(id),
            KeystoreError::KeyExists(id) => VaultError::AlreadyExists(id),
            other => VaultError::Backend(other.to_string()),
        }
    }
}

/// Encrypted, append-only key record store
pub struct EncryptedKeyStore {
    conn: Connection,
    key: Zeroizing<[u8; 32]>,
    path: PathBuf,
}

impl EncryptedKeyStore {
    /// Open (or create) the store at `path`
    ///
    /// A new file gets a fresh salt and check record. An existing file must
    /// decrypt its check record with `password`, otherwise `InvalidPassword`.
    pub fn open(path: impl AsRef<Path>, password: &str) -> Result<Self, KeystoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                name TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS keys (
                id TEXT PRIMARY KEY,
                nonce BLOB NOT NULL,
                ciphertext BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )?;

        let salt: Option<Vec<u8>> = conn
            .query_row("SELECT value FROM meta WHERE name = 'salt'", [], |row| row.get(0))
            .optional()?;

        let store = match salt {
            Some(salt) => {
                let store = Self {
                    key: Self::derive_key(password, &salt),
                    conn,
                    path,
                };
                store.verify_password()?;
                store
            }
            None => {
                let mut salt = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut salt);

                let store = Self {
                    key: Self::derive_key(password, &salt),
                    conn,
                    path,
                };
                let (nonce, ciphertext) = store.seal(CHECK_PLAINTEXT)?;
                let tx = store.conn.unchecked_transaction()?;
                tx.execute("INSERT INTO meta (name, value) VALUES ('salt', ?1)", params![&salt[..]])?;
                tx.execute("INSERT INTO meta (name, value) VALUES ('check_nonce', ?1)", params![nonce])?;
                tx.execute("INSERT INTO meta (name, value) VALUES ('check', ?1)", params![ciphertext])?;
                tx.commit()?;

                tracing::info!(path = %store.path.display(), "Created key store");
                store
            }
        };

        Ok(store)
    }

    /// Derive encryption key from password using SHA-256
    fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(salt);
        hasher.update(b"custodia-keystore-v1");
        Zeroizing::new(hasher.finalize().into())
    }

    fn cipher(&self) -> Result<Aes256Gcm, KeystoreError> {
        Aes256Gcm::new_from_slice(&self.key[..]).map_err(|e| KeystoreError::Encryption(e.to_string()))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), KeystoreError> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| KeystoreError::Encryption(e.to_string()))?;

        Ok((nonce_bytes.to_vec(), ciphertext))
    }

    fn unseal(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
        if nonce.len() != 12 {
            return Err(KeystoreError::Decryption(format!("nonce is {} bytes", nonce.len())));
        }
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| KeystoreError::InvalidPassword)
    }

    fn meta(&self, name: &str) -> Result<Vec<u8>, KeystoreError> {
        self.conn
            .query_row("SELECT value FROM meta WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?
            .ok_or_else(|| KeystoreError::Decryption(format!("missing {} record", name)))
    }

    fn verify_password(&self) -> Result<(), KeystoreError> {
        let nonce = self.meta("check_nonce")?;
        let ciphertext = self.meta("check")?;
        let plaintext = self.unseal(&nonce, &ciphertext)?;
        if plaintext.as_slice() != CHECK_PLAINTEXT {
            return Err(KeystoreError::InvalidPassword);
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of key records
    pub fn len(&self) -> Result<u64, KeystoreError> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM keys", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool, KeystoreError> {
        Ok(self.len()? == 0)
    }

    pub fn put(&self, id: &str, material: &[u8]) -> Result<(), KeystoreError> {
        if self.exists(id)? {
            return Err(KeystoreError::KeyExists(id.to_string()));
        }

        let (nonce, ciphertext) = self.seal(material)?;
        self.conn.execute(
            "INSERT INTO keys (id, nonce, ciphertext, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, nonce, ciphertext, unix_now()],
        )?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<KeyMaterial, KeystoreError> {
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT nonce, ciphertext FROM keys WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (nonce, ciphertext) = row.ok_or_else(|| KeystoreError::KeyNotFound(id.to_string()))?;
        let plaintext = self.unseal(&nonce, &ciphertext)?;
        Ok(KeyMaterial::new(plaintext.to_vec()))
    }

    pub fn exists(&self, id: &str) -> Result<bool, KeystoreError> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM keys WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count_with_prefix(&self, prefix: &str) -> Result<u64, KeystoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM keys WHERE substr(id, 1, length(?1)) = ?1",
            params![prefix],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl KeyVault for EncryptedKeyStore {
    fn insert(&mut self, key: &str, material: &[u8]) -> Result<(), VaultError> {
        Ok(self.put(key, material)?)
    }

    fn get(&self, key: &str) -> Result<KeyMaterial, VaultError> {
        Ok(self.load(key)?)
    }

    fn contains(&self, key: &str) -> Result<bool, VaultError> {
        Ok(self.exists(key)?)
    }

    fn count_prefix(&self, prefix: &str) -> Result<u64, VaultError> {
        Ok(self.count_with_prefix(prefix)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_derivation_deterministic() {
        let key1 = EncryptedKeyStore::derive_key("password123", b"salt");
        let key2 = EncryptedKeyStore::derive_key("password123", b"salt");
        assert_eq!(*key1, *key2);

        let key3 = EncryptedKeyStore::derive_key("password123", b"different_salt");
        assert_ne!(*key1, *key3);
    }

    #[test]
    fn test_keystore_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.db");

        {
            let store = EncryptedKeyStore::open(&path, "test_password").unwrap();
            store.put("btc/seed", &[7u8; 64]).unwrap();
            store.put("btc/mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef", b"cVt4o7BGAig1UXywgGSmARhxMdzP5qvQsxKkSsc1XEkw3tDTQFpy").unwrap();
        }

        let store = EncryptedKeyStore::open(&path, "test_password").unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.load("btc/seed").unwrap().as_bytes(), &[7u8; 64]);
        assert_eq!(store.count_with_prefix("btc/").unwrap(), 2);
        assert_eq!(store.count_with_prefix("eth/").unwrap(), 0);
    }

    #[test]
    fn test_keystore_wrong_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.db");

        EncryptedKeyStore::open(&path, "correct").unwrap();

        let result = EncryptedKeyStore::open(&path, "wrong");
        assert!(matches!(result, Err(KeystoreError::InvalidPassword)));
    }

    #[test]
    fn test_records_are_append_only() {
        let dir = tempdir().unwrap();
        let mut store = EncryptedKeyStore::open(dir.path().join("keys.db"), "pw").unwrap();

        store.insert("eth/0xabc", b"first").unwrap();
        assert!(matches!(store.insert("eth/0xabc", b"second"), Err(VaultError::AlreadyExists(_))));
        assert_eq!(store.get("eth/0xabc").unwrap().as_bytes(), b"first");
        assert!(matches!(store.get("eth/0xdef"), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_secrets_not_stored_in_clear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let store = EncryptedKeyStore::open(&path, "pw").unwrap();
        store.put("trx/seed", b"very-secret-material").unwrap();
        drop(store);

        let raw = std::fs::read(&path).unwrap();
        assert!(!raw.windows(20).any(|w| w == b"very-secret-material"));
    }
}
