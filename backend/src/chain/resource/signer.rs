//! Tron transaction signing
//!
//! The node builds the transaction; we check that `txID` is the SHA-256 of
//! `raw_data_hex`, that the owner is the expected source, and sign the txID
//! with a recoverable secp256k1 signature (`r ‖ s ‖ v+27`).

use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, Secp256k1, SecretKey,
};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::address::{self, TronAddress};
use super::client::TronTransaction;
use crate::chain::{ChainError, ChainResult, KeyMaterial, SigningContext};

pub fn secret_key(key: &KeyMaterial) -> ChainResult<SecretKey> {
    SecretKey::from_slice(key.as_bytes()).map_err(|e| ChainError::Signing(format!("invalid key: {}", e)))
}

/// Hash of raw_data_hex, checked against the declared txID
fn tx_digest(tx: &TronTransaction) -> ChainResult<[u8; 32]> {
    let raw = hex::decode(&tx.raw_data_hex)
        .map_err(|e| ChainError::InvalidTransaction(format!("raw_data_hex: {}", e)))?;
    let digest: [u8; 32] = Sha256::digest(&raw).into();

    if !hex::encode(digest).eq_ignore_ascii_case(&tx.tx_id) {
        return Err(ChainError::Verification("txID does not match raw_data_hex".to_string()));
    }
    Ok(digest)
}

/// Owner must be `from` and must appear in the signed bytes; value must fit the declared amount
fn check_contract(tx: &TronTransaction, from: &TronAddress, vin_amount: u128) -> ChainResult<()> {
    let contract = tx.contract()?;
    let value = &contract["parameter"]["value"];

    let owner = value["owner_address"]
        .as_str()
        .ok_or_else(|| ChainError::InvalidTransaction("missing owner_address".to_string()))?;
    if &address::decode(owner)? != from {
        return Err(ChainError::Verification(format!("owner {} is not the source address", owner)));
    }
    if !tx.raw_data_hex.to_ascii_lowercase().contains(&hex::encode(from)) {
        return Err(ChainError::Verification("owner missing from signed bytes".to_string()));
    }

    match contract["type"].as_str() {
        Some("TransferContract") => {
            let amount = value["amount"].as_u64().unwrap_or(0) as u128;
            if amount > vin_amount {
                return Err(ChainError::Verification(format!(
                    "amount {} exceeds declared {}",
                    amount, vin_amount
                )));
            }
        }
        Some("TriggerSmartContract") => {
            if value.get("call_value").and_then(Value::as_u64).unwrap_or(0) != 0 {
                return Err(ChainError::Verification("contract call carries TRX value".to_string()));
            }
        }
        other => {
            return Err(ChainError::InvalidTransaction(format!("unsupported contract type {:?}", other)));
        }
    }
    Ok(())
}

pub fn sign_transaction(unsigned_hex: &str, key: &KeyMaterial, ctx: &SigningContext) -> ChainResult<String> {
    let mut tx = TronTransaction::from_hex(unsigned_hex)?;
    if !tx.signature.is_empty() {
        return Err(ChainError::InvalidTransaction("transaction is already signed".to_string()));
    }

    let from = address::decode(&ctx.from_address)?;
    let digest = tx_digest(&tx)?;
    check_contract(&tx, &from, ctx.vin_amount)?;

    let secp = Secp256k1::new();
    let sk = secret_key(key)?;
    if address::from_public_key(&PublicKey::from_secret_key(&secp, &sk)) != from {
        return Err(ChainError::Signing("key does not match source address".to_string()));
    }

    let msg = Message::from_digest(digest);
    let (recovery_id, compact) = secp.sign_ecdsa_recoverable(&msg, &sk).serialize_compact();

    let mut signature = compact.to_vec();
    signature.push(recovery_id.to_i32() as u8 + 27);

    if recover_address(&digest, &signature)? != from {
        return Err(ChainError::Verification("signature recovers a different address".to_string()));
    }

    tx.signature = vec![hex::encode(&signature)];
    tx.to_hex()
}

/// Address behind a 65-byte `r ‖ s ‖ v` signature over `digest`
pub fn recover_address(digest: &[u8; 32], signature: &[u8]) -> ChainResult<TronAddress> {
    if signature.len() != 65 {
        return Err(ChainError::Verification(format!("signature is {} bytes", signature.len())));
    }

    let v = signature[64].checked_sub(27).unwrap_or(signature[64]);
    let recovery_id = RecoveryId::from_i32(v as i32).map_err(|e| ChainError::Verification(e.to_string()))?;
    let sig = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|e| ChainError::Verification(e.to_string()))?;

    let pubkey = Secp256k1::verification_only()
        .recover_ecdsa(&Message::from_digest(*digest), &sig)
        .map_err(|e| ChainError::Verification(e.to_string()))?;
    Ok(address::from_public_key(&pubkey))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn keypair(seed: u8) -> (KeyMaterial, TronAddress) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        let address = address::from_public_key(&PublicKey::from_secret_key(&secp, &sk));
        (KeyMaterial::new(sk.secret_bytes().to_vec()), address)
    }

    /// A transfer whose raw_data_hex embeds the owner like a real node encoding would
    pub(crate) fn transfer(owner: &TronAddress, amount: u64) -> TronTransaction {
        let raw_data_hex = format!("0a02beef2244{}{}", hex::encode(owner), hex::encode(amount.to_be_bytes()));
        let raw = hex::decode(&raw_data_hex).unwrap();

        TronTransaction {
            tx_id: hex::encode(Sha256::digest(&raw)),
            raw_data: json!({
                "contract": [{
                    "type": "TransferContract",
                    "parameter": { "value": {
                        "owner_address": address::encode(owner),
                        "to_address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
                        "amount": amount,
                    }}
                }]
            }),
            raw_data_hex,
            signature: vec![],
            visible: true,
        }
    }

    fn ctx(from: &TronAddress, vin_amount: u128) -> SigningContext {
        SigningContext {
            chain_id: 0,
            from_address: address::encode(from),
            vin_amount,
        }
    }

    #[test]
    fn test_sign_and_recover() {
        let (key, from) = keypair(9);
        let tx = transfer(&from, 1_500_000);

        let signed = TronTransaction::from_hex(
            &sign_transaction(&tx.to_hex().unwrap(), &key, &ctx(&from, 1_500_000)).unwrap(),
        )
        .unwrap();

        assert_eq!(signed.tx_id, tx.tx_id);
        assert_eq!(signed.signature.len(), 1);
        let sig = hex::decode(&signed.signature[0]).unwrap();
        assert_eq!(sig.len(), 65);
        assert!(sig[64] == 27 || sig[64] == 28);

        let digest: [u8; 32] = hex::decode(&tx.tx_id).unwrap().try_into().unwrap();
        assert_eq!(recover_address(&digest, &sig).unwrap(), from);
    }

    #[test]
    fn test_tampered_txid() {
        let (key, from) = keypair(9);
        let mut tx = transfer(&from, 1);
        tx.tx_id = "00".repeat(32);

        assert!(matches!(
            sign_transaction(&tx.to_hex().unwrap(), &key, &ctx(&from, 1)),
            Err(ChainError::Verification(_))
        ));
    }

    #[test]
    fn test_foreign_owner() {
        let (key, from) = keypair(9);
        let (_, other) = keypair(10);
        let tx = transfer(&other, 1);

        assert!(matches!(
            sign_transaction(&tx.to_hex().unwrap(), &key, &ctx(&from, 1)),
            Err(ChainError::Verification(_))
        ));
    }

    #[test]
    fn test_wrong_key() {
        let (_, from) = keypair(9);
        let (other_key, _) = keypair(10);
        let tx = transfer(&from, 1);

        assert!(matches!(
            sign_transaction(&tx.to_hex().unwrap(), &other_key, &ctx(&from, 1)),
            Err(ChainError::Signing(_))
        ));
    }

    #[test]
    fn test_amount_above_declared() {
        let (key, from) = keypair(9);
        let tx = transfer(&from, 2_000);

        assert!(matches!(
            sign_transaction(&tx.to_hex().unwrap(), &key, &ctx(&from, 1_999)),
            Err(ChainError::Verification(_))
        ));
    }
}
