//! Account-chain transaction assembly
//!
//! The unsigned form is the six-field legacy RLP list
//! `[nonce, gasPrice, gasLimit, to, value, data]`. EIP-155 replay protection
//! is applied at signing time from the signing context's chain id.

use alloy::{
    consensus::TxLegacy,
    primitives::{Address, Bytes, TxKind, U256},
};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};

use crate::chain::{ChainError, ChainResult};

/// Gas limit of a plain value transfer
pub const TRANSFER_GAS: u64 = 21_000;

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct UnsignedEvmTx {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
}

impl UnsignedEvmTx {
    pub fn fee(&self) -> U256 {
        U256::from(self.gas_price) * U256::from(self.gas_limit)
    }

    pub fn to_hex(&self) -> String {
        let mut buf = Vec::with_capacity(self.length());
        self.encode(&mut buf);
        hex::encode(buf)
    }

    pub fn from_hex(s: &str) -> ChainResult<Self> {
        let bytes = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|e| ChainError::InvalidTransaction(format!("hex: {}", e)))?;
        let mut slice = bytes.as_slice();
        let tx = Self::decode(&mut slice).map_err(|e| ChainError::InvalidTransaction(format!("rlp: {}", e)))?;
        if !slice.is_empty() {
            return Err(ChainError::InvalidTransaction("trailing bytes after RLP list".to_string()));
        }
        Ok(tx)
    }

    pub fn into_legacy(self, chain_id: u64) -> TxLegacy {
        TxLegacy {
            chain_id: Some(chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(self.to),
            value: self.value,
            input: self.input,
        }
    }
}

fn insufficient(required: U256, available: U256) -> ChainError {
    ChainError::InsufficientFunds {
        required: required.to_string(),
        available: available.to_string(),
    }
}

/// Native transfer: the balance must strictly exceed the amount and cover amount plus fee
pub fn check_native_funds(balance: U256, amount: U256, fee: U256) -> ChainResult<()> {
    if balance <= amount {
        return Err(insufficient(amount, balance));
    }
    let required = amount.saturating_add(fee);
    if balance < required {
        return Err(insufficient(required, balance));
    }
    Ok(())
}

/// Token transfer: token balance must strictly exceed the amount, native balance must cover the fee
pub fn check_token_funds(token_balance: U256, amount: U256, native_balance: U256, fee: U256) -> ChainResult<()> {
    if token_balance <= amount {
        return Err(insufficient(amount, token_balance));
    }
    if native_balance < fee {
        return Err(insufficient(fee, native_balance));
    }
    Ok(())
}

/// Convert a node-reported U256 into ledger units
pub fn to_u128(value: U256) -> ChainResult<u128> {
    u128::try_from(value).map_err(|_| ChainError::InvalidAmount(format!("{} exceeds u128", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::account::erc20::transfer_calldata;

    fn sample() -> UnsignedEvmTx {
        UnsignedEvmTx {
            nonce: 7,
            gas_price: 20_000_000_000,
            gas_limit: TRANSFER_GAS,
            to: Address::repeat_byte(0x22),
            value: U256::from(10u64).pow(U256::from(18u64)),
            input: Bytes::new(),
        }
    }

    #[test]
    fn test_hex_decode_matches() {
        let tx = sample();
        assert_eq!(UnsignedEvmTx::from_hex(&tx.to_hex()).unwrap(), tx);
        assert_eq!(UnsignedEvmTx::from_hex(&format!("0x{}", tx.to_hex())).unwrap(), tx);

        let token = UnsignedEvmTx {
            value: U256::ZERO,
            gas_limit: 65_000,
            input: transfer_calldata(Address::repeat_byte(0x33), U256::from(5u64)),
            ..sample()
        };
        assert_eq!(UnsignedEvmTx::from_hex(&token.to_hex()).unwrap(), token);
    }

    #[test]
    fn test_rlp_list_layout() {
        let bytes = hex::decode(sample().to_hex()).unwrap();
        // list prefix, then nonce 7 as a single byte
        assert!(bytes[0] >= 0xc0);
        let header_len = if bytes[0] <= 0xf7 { 1 } else { 1 + (bytes[0] - 0xf7) as usize };
        assert_eq!(bytes[header_len], 0x07);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(UnsignedEvmTx::from_hex("zz"), Err(ChainError::InvalidTransaction(_))));
        assert!(matches!(UnsignedEvmTx::from_hex("c0"), Err(ChainError::InvalidTransaction(_))));

        let mut hex = sample().to_hex();
        hex.push_str("00");
        assert!(matches!(UnsignedEvmTx::from_hex(&hex), Err(ChainError::InvalidTransaction(_))));
    }

    #[test]
    fn test_fee() {
        assert_eq!(sample().fee(), U256::from(20_000_000_000u128 * 21_000));
    }

    #[test]
    fn test_native_funds_checks() {
        let amount = U256::from(100u64);
        let fee = U256::from(10u64);

        // balance equal to amount is rejected even before the fee
        assert!(check_native_funds(U256::from(100u64), amount, U256::ZERO).is_err());
        assert!(check_native_funds(U256::from(109u64), amount, fee).is_err());
        assert!(check_native_funds(U256::from(110u64), amount, fee).is_ok());
    }

    #[test]
    fn test_token_funds_checks() {
        let amount = U256::from(500u64);
        let fee = U256::from(10u64);

        assert!(check_token_funds(U256::from(500u64), amount, U256::from(1_000u64), fee).is_err());
        assert!(check_token_funds(U256::from(501u64), amount, U256::from(9u64), fee).is_err());
        assert!(check_token_funds(U256::from(501u64), amount, U256::from(10u64), fee).is_ok());
    }

    #[test]
    fn test_to_u128() {
        assert_eq!(to_u128(U256::from(42u64)).unwrap(), 42);
        assert!(to_u128(U256::MAX).is_err());
    }
}
