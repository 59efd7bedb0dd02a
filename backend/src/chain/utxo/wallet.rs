//! BIP44 receiving keys for the UTXO chain
//!
//! A per-chain seed is generated once and kept in the vault. Each new
//! address takes the next index on `m/44'/coin'/0'/0/i`; the derived WIF is
//! stored under the address so signing never has to re-derive.

use bitcoin::{
    bip32::{DerivationPath, Xpriv},
    secp256k1::Secp256k1,
    Address, Network,
};
use rand::RngCore;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::chain::{ChainError, ChainResult, KeyVault};

const SEED_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct HdWallet {
    tag: String,
    network: Network,
    coin_type: u32,
}

impl HdWallet {
    pub fn new(tag: &str, network: Network, coin_type: u32) -> Self {
        Self {
            tag: tag.to_string(),
            network,
            coin_type,
        }
    }

    fn seed_key(&self) -> String {
        format!("{}/seed", self.tag)
    }

    fn path_prefix(&self) -> String {
        format!("{}/path/", self.tag)
    }

    pub fn key_id(&self, address: &str) -> String {
        format!("{}/{}", self.tag, address)
    }

    pub fn derivation_path(&self, index: u64) -> String {
        format!("m/44'/{}'/0'/0/{}", self.coin_type, index)
    }

    /// Generate the seed if the vault has none
    pub fn bootstrap(&self, vault: &mut dyn KeyVault) -> ChainResult<()> {
        let seed_key = self.seed_key();
        if vault.contains(&seed_key)? {
            return Ok(());
        }

        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        rand::thread_rng().fill_bytes(seed.as_mut());
        vault.insert(&seed_key, seed.as_ref())?;

        tracing::info!(target: "custodia::wallet", chain = %self.tag, "HD seed generated");
        Ok(())
    }

    /// Derive the next address, store its key and path record
    ///
    /// The path record is what advances the index, so it is written last.
    pub fn create(&self, vault: &mut dyn KeyVault) -> ChainResult<String> {
        self.bootstrap(vault)?;

        let seed = vault.get(&self.seed_key())?;
        let index = vault.count_prefix(&self.path_prefix())?;
        let path = DerivationPath::from_str(&self.derivation_path(index))
            .map_err(|e| ChainError::Signing(format!("derivation path: {}", e)))?;

        let secp = Secp256k1::new();
        let child = Xpriv::new_master(self.network, seed.as_bytes())
            .and_then(|master| master.derive_priv(&secp, &path))
            .map_err(|e| ChainError::Signing(format!("derivation failed: {}", e)))?;

        let privkey = child.to_priv();
        let address = Address::p2pkh(privkey.public_key(&secp).pubkey_hash(), self.network).to_string();

        // Left over from a create whose path record never landed. Derivation is
        // deterministic, so the stored key is the one we would write.
        let key_id = self.key_id(&address);
        if !vault.contains(&key_id)? {
            let wif = Zeroizing::new(privkey.to_wif());
            vault.insert(&key_id, wif.as_bytes())?;
        }
        vault.insert(&format!("{}{:010}", self.path_prefix(), index), address.as_bytes())?;

        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::utxo::signer::private_key;
    use crate::chain::MemoryVault;

    fn wallet() -> HdWallet {
        HdWallet::new("btc", Network::Regtest, 1)
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let mut vault = MemoryVault::new();
        wallet().bootstrap(&mut vault).unwrap();
        let seed = vault.get("btc/seed").unwrap();

        wallet().bootstrap(&mut vault).unwrap();
        assert_eq!(vault.get("btc/seed").unwrap().as_bytes(), seed.as_bytes());
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn test_create_distinct_addresses() {
        let mut vault = MemoryVault::new();
        let w = wallet();

        let a = w.create(&mut vault).unwrap();
        let b = w.create(&mut vault).unwrap();

        assert_ne!(a, b);
        assert!(a.starts_with('m') || a.starts_with('n'));
        assert_eq!(vault.count_prefix("btc/path/").unwrap(), 2);
        assert_eq!(vault.get("btc/path/0000000000").unwrap().as_bytes(), a.as_bytes());
    }

    #[test]
    fn test_create_resumes_after_missing_path_record() {
        let mut vault = MemoryVault::new();
        let w = wallet();
        let first = w.create(&mut vault).unwrap();

        // Key for index 1 stored, its path record lost
        let mut scratch = MemoryVault::new();
        scratch.insert("btc/seed", vault.get("btc/seed").unwrap().as_bytes()).unwrap();
        scratch.insert("btc/path/0000000000", first.as_bytes()).unwrap();
        let second = w.create(&mut scratch).unwrap();
        let key = scratch.get(&w.key_id(&second)).unwrap();
        vault.insert(&w.key_id(&second), key.as_bytes()).unwrap();

        let resumed = w.create(&mut vault).unwrap();
        assert_eq!(resumed, second);
        assert_eq!(vault.count_prefix("btc/path/").unwrap(), 2);

        let third = w.create(&mut vault).unwrap();
        assert_ne!(third, second);
        assert_eq!(vault.count_prefix("btc/path/").unwrap(), 3);
    }

    #[test]
    fn test_stored_key_controls_address() {
        let mut vault = MemoryVault::new();
        let w = wallet();
        let address = w.create(&mut vault).unwrap();

        let key = vault.get(&w.key_id(&address)).unwrap();
        let privkey = private_key(&key).unwrap();
        let secp = Secp256k1::new();
        let derived = Address::p2pkh(privkey.public_key(&secp).pubkey_hash(), Network::Regtest);
        assert_eq!(derived.to_string(), address);
    }

    #[test]
    fn test_derivation_path() {
        assert_eq!(wallet().derivation_path(3), "m/44'/1'/0'/0/3");
        assert_eq!(HdWallet::new("btc", Network::Bitcoin, 0).derivation_path(0), "m/44'/0'/0'/0/0");
    }
}
