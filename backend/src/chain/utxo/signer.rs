//! Legacy P2PKH signing
//!
//! Signs every input of an unsigned transaction with the key behind the
//! source address, then re-verifies each input script before the
//! transaction leaves the signing boundary.

use bitcoin::{
    hashes::Hash,
    script::{Instruction, PushBytesBuf},
    secp256k1::{Message, Secp256k1},
    sighash::{EcdsaSighashType, SighashCache},
    Address, Network, PrivateKey, PublicKey, Script, ScriptBuf, Transaction,
};
use std::str::FromStr;

use crate::chain::{ChainError, ChainResult, KeyMaterial, SigningContext};

/// Parse WIF key material
pub fn private_key(key: &KeyMaterial) -> ChainResult<PrivateKey> {
    let wif = std::str::from_utf8(key.as_bytes())
        .map_err(|_| ChainError::Signing("key material is not a WIF string".to_string()))?;
    PrivateKey::from_wif(wif).map_err(|e| ChainError::Signing(format!("invalid WIF: {}", e)))
}

pub fn decode_tx(tx_hex: &str) -> ChainResult<Transaction> {
    let bytes = hex::decode(tx_hex.trim())
        .map_err(|e| ChainError::InvalidTransaction(format!("hex: {}", e)))?;
    bitcoin::consensus::deserialize(&bytes)
        .map_err(|e| ChainError::InvalidTransaction(format!("decode: {}", e)))
}

/// Sign all inputs of `tx_hex` as spends from `ctx.from_address`
pub fn sign_transaction(
    tx_hex: &str,
    key: &KeyMaterial,
    ctx: &SigningContext,
    network: Network,
) -> ChainResult<String> {
    let mut tx = decode_tx(tx_hex)?;
    if tx.input.is_empty() {
        return Err(ChainError::InvalidTransaction("transaction has no inputs".to_string()));
    }

    let from = Address::from_str(&ctx.from_address)
        .map_err(|e| ChainError::AddressDecode(e.to_string()))?
        .require_network(network)
        .map_err(|e| ChainError::AddressDecode(e.to_string()))?;
    let script_pubkey = from.script_pubkey();
    if !script_pubkey.is_p2pkh() {
        return Err(ChainError::Signing(format!("{} is not a P2PKH address", from)));
    }

    let output_total: u128 = tx.output.iter().map(|o| o.value.to_sat() as u128).sum();
    if output_total > ctx.vin_amount {
        return Err(ChainError::Verification(format!(
            "outputs {} exceed inputs {}",
            output_total, ctx.vin_amount
        )));
    }

    let secp = Secp256k1::new();
    let privkey = private_key(key)?;
    let pubkey = privkey.public_key(&secp);
    if ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()) != script_pubkey {
        return Err(ChainError::Signing("key does not match source address".to_string()));
    }

    let sighashes = {
        let cache = SighashCache::new(&tx);
        (0..tx.input.len())
            .map(|i| cache.legacy_signature_hash(i, &script_pubkey, EcdsaSighashType::All.to_u32()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ChainError::Signing(e.to_string()))?
    };

    for (input, sighash) in tx.input.iter_mut().zip(sighashes) {
        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = bitcoin::ecdsa::Signature {
            signature: secp.sign_ecdsa(&msg, &privkey.inner),
            sighash_type: EcdsaSighashType::All,
        };
        let sig_push = PushBytesBuf::try_from(signature.to_vec())
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        input.script_sig = ScriptBuf::builder()
            .push_slice(sig_push)
            .push_key(&pubkey)
            .into_script();
    }

    verify_p2pkh(&tx, &script_pubkey)?;
    Ok(bitcoin::consensus::encode::serialize_hex(&tx))
}

/// Check every input script of `tx` against `script_pubkey`
pub fn verify_p2pkh(tx: &Transaction, script_pubkey: &Script) -> ChainResult<()> {
    let secp = Secp256k1::verification_only();
    let cache = SighashCache::new(tx);

    for (i, input) in tx.input.iter().enumerate() {
        let mut pushes = input.script_sig.instructions();
        let mut next_push = || match pushes.next() {
            Some(Ok(Instruction::PushBytes(bytes))) => Ok(bytes.as_bytes().to_vec()),
            _ => Err(ChainError::Verification(format!("input {}: malformed script_sig", i))),
        };
        let sig_bytes = next_push()?;
        let key_bytes = next_push()?;
        if pushes.next().is_some() {
            return Err(ChainError::Verification(format!("input {}: trailing script data", i)));
        }

        let signature = bitcoin::ecdsa::Signature::from_slice(&sig_bytes)
            .map_err(|e| ChainError::Verification(format!("input {}: {}", i, e)))?;
        let pubkey = PublicKey::from_slice(&key_bytes)
            .map_err(|e| ChainError::Verification(format!("input {}: {}", i, e)))?;

        if ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()).as_script() != script_pubkey {
            return Err(ChainError::Verification(format!("input {}: key hash mismatch", i)));
        }

        let sighash = cache
            .legacy_signature_hash(i, script_pubkey, signature.sighash_type.to_u32())
            .map_err(|e| ChainError::Verification(e.to_string()))?;
        secp.verify_ecdsa(
            &Message::from_digest(sighash.to_byte_array()),
            &signature.signature,
            &pubkey.inner,
        )
        .map_err(|e| ChainError::Verification(format!("input {}: {}", i, e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::utxo::builder::{BuildRequest, Payment, UtxoTxBuilder};
    use crate::chain::utxo::selector::SelectionParams;
    use crate::types::{UnspentOutput, UtxoState};

    const TO: &str = "n3GNqMveyvaPvUbH469vDRadqpJMPc84JA";

    fn keypair(seed: u8) -> (KeyMaterial, String) {
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[seed; 32]).unwrap();
        let privkey = PrivateKey::new(sk, Network::Regtest);
        let address = Address::p2pkh(privkey.public_key(&secp).pubkey_hash(), Network::Regtest);
        (KeyMaterial::new(privkey.to_wif().into_bytes()), address.to_string())
    }

    fn unsigned(from: &str, inputs: u8) -> (String, u128) {
        let candidates: Vec<UnspentOutput> = (0..inputs)
            .map(|n| UnspentOutput {
                txid: hex::encode([n + 1; 32]),
                vout: n as u32,
                amount: 30_000,
                height: 90,
                state: UtxoState::Original,
                reorg: false,
                address: from.to_string(),
                chain: "btc".to_string(),
                block_hash: "h90".to_string(),
                spent_block_hash: None,
            })
            .collect();

        let built = UtxoTxBuilder::new(Network::Regtest, SelectionParams::default())
            .build(&BuildRequest {
                from,
                to: TO,
                payment: Payment::Native {
                    amount: 30_000 * inputs as u64 - 5_000,
                },
                candidates: &candidates,
                tip_height: 100,
                fee_rate: 1.0,
            })
            .unwrap();
        (built.to_hex(), built.vin_amount as u128)
    }

    fn ctx(from: &str, vin_amount: u128) -> SigningContext {
        SigningContext {
            chain_id: 0,
            from_address: from.to_string(),
            vin_amount,
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let (key, from) = keypair(7);
        let (tx_hex, vin) = unsigned(&from, 3);

        let signed_hex = sign_transaction(&tx_hex, &key, &ctx(&from, vin), Network::Regtest).unwrap();
        let signed = decode_tx(&signed_hex).unwrap();

        assert_eq!(signed.input.len(), 3);
        assert!(signed.input.iter().all(|i| !i.script_sig.is_empty()));

        let script = Address::from_str(&from)
            .unwrap()
            .assume_checked()
            .script_pubkey();
        verify_p2pkh(&signed, &script).unwrap();
    }

    #[test]
    fn test_wrong_key_rejected() {
        let (_, from) = keypair(7);
        let (other_key, _) = keypair(8);
        let (tx_hex, vin) = unsigned(&from, 1);

        let err = sign_transaction(&tx_hex, &other_key, &ctx(&from, vin), Network::Regtest).unwrap_err();
        assert!(matches!(err, ChainError::Signing(_)));
    }

    #[test]
    fn test_outputs_exceeding_inputs_rejected() {
        let (key, from) = keypair(7);
        let (tx_hex, _) = unsigned(&from, 1);

        let err = sign_transaction(&tx_hex, &key, &ctx(&from, 1_000), Network::Regtest).unwrap_err();
        assert!(matches!(err, ChainError::Verification(_)));
    }

    #[test]
    fn test_tampered_signature_fails_verification() {
        let (key, from) = keypair(7);
        let (tx_hex, vin) = unsigned(&from, 1);
        let signed_hex = sign_transaction(&tx_hex, &key, &ctx(&from, vin), Network::Regtest).unwrap();

        let mut signed = decode_tx(&signed_hex).unwrap();
        signed.output[0].value = bitcoin::Amount::from_sat(signed.output[0].value.to_sat() - 1);

        let script = Address::from_str(&from)
            .unwrap()
            .assume_checked()
            .script_pubkey();
        assert!(matches!(verify_p2pkh(&signed, &script), Err(ChainError::Verification(_))));
    }

    #[test]
    fn test_garbage_hex() {
        let (key, from) = keypair(7);
        assert!(matches!(
            sign_transaction("zz", &key, &ctx(&from, 0), Network::Regtest),
            Err(ChainError::InvalidTransaction(_))
        ));
    }
}
