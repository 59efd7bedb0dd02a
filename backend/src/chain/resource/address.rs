//! Tron addresses: `0x41 ‖ keccak256(pubkey)[12..]`, base58check encoded

use alloy::primitives::{keccak256, Address};
use secp256k1::PublicKey;

use crate::chain::{ChainError, ChainResult};

pub const ADDRESS_PREFIX: u8 = 0x41;
pub const ADDRESS_LEN: usize = 21;

pub type TronAddress = [u8; ADDRESS_LEN];

pub fn from_public_key(key: &PublicKey) -> TronAddress {
    let uncompressed = key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);

    let mut out = [0u8; ADDRESS_LEN];
    out[0] = ADDRESS_PREFIX;
    out[1..].copy_from_slice(&hash[12..]);
    out
}

pub fn encode(address: &TronAddress) -> String {
    bitcoin::base58::encode_check(address)
}

/// Accepts base58 (`T...`) or 42-char hex (`41...`)
pub fn decode(s: &str) -> ChainResult<TronAddress> {
    let s = s.trim();
    let bytes = if s.len() == 2 * ADDRESS_LEN && s.starts_with("41") {
        hex::decode(s).map_err(|e| ChainError::AddressDecode(format!("{}: {}", s, e)))?
    } else {
        bitcoin::base58::decode_check(s).map_err(|e| ChainError::AddressDecode(format!("{}: {}", s, e)))?
    };

    let address: TronAddress = bytes
        .try_into()
        .map_err(|_| ChainError::AddressDecode(format!("{}: wrong length", s)))?;
    if address[0] != ADDRESS_PREFIX {
        return Err(ChainError::AddressDecode(format!("{}: wrong prefix", s)));
    }
    Ok(address)
}

/// The 20-byte body as an EVM address, for ABI encoding
pub fn to_evm(address: &TronAddress) -> Address {
    Address::from_slice(&address[1..])
}
