//! EIP-155 legacy signing

use alloy::{
    consensus::{transaction::SignerRecoverable, SignableTransaction, TxEnvelope},
    eips::eip2718::Encodable2718,
    network::TxSignerSync,
    primitives::{Address, U256},
    signers::local::PrivateKeySigner,
};
use std::str::FromStr;

use super::builder::UnsignedEvmTx;
use crate::chain::{ChainError, ChainResult, KeyMaterial, SigningContext};

pub fn signer_from_key(key: &KeyMaterial) -> ChainResult<PrivateKeySigner> {
    PrivateKeySigner::from_slice(key.as_bytes()).map_err(|e| ChainError::Signing(format!("invalid key: {}", e)))
}

/// Sign an unsigned legacy transaction and return the raw signed envelope as hex
pub fn sign_legacy(unsigned_hex: &str, key: &KeyMaterial, ctx: &SigningContext) -> ChainResult<String> {
    let unsigned = UnsignedEvmTx::from_hex(unsigned_hex)?;
    let from = Address::from_str(&ctx.from_address).map_err(|e| ChainError::AddressDecode(e.to_string()))?;

    if unsigned.value > U256::from(ctx.vin_amount) {
        return Err(ChainError::Verification(format!(
            "value {} exceeds declared amount {}",
            unsigned.value, ctx.vin_amount
        )));
    }

    let signer = signer_from_key(key)?;
    if signer.address() != from {
        return Err(ChainError::Signing("key does not match source address".to_string()));
    }

    let mut tx = unsigned.into_legacy(ctx.chain_id);
    let signature = signer
        .sign_transaction_sync(&mut tx)
        .map_err(|e| ChainError::Signing(e.to_string()))?;
    let envelope = TxEnvelope::from(tx.into_signed(signature));

    let recovered = envelope
        .recover_signer()
        .map_err(|e| ChainError::Verification(e.to_string()))?;
    if recovered != from {
        return Err(ChainError::Verification(format!("recovered {} instead of {}", recovered, from)));
    }

    Ok(hex::encode(envelope.encoded_2718()))
}
