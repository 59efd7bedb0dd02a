//! Resource chain adapter (Tron + TRC-20)
//!
//! Tron accounts pay for transactions with bandwidth and energy before any
//! TRX is burned, so the fee reported for a withdrawal is the burn left over
//! after the sender's own resources are applied.

pub mod address;
pub mod client;
pub mod fees;
pub mod signer;

use alloy::primitives::U256;
use async_trait::async_trait;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde_json::Value;
use std::time::Duration;

use self::client::{TronBlock, TronClient};
use self::fees::{estimate_fee, signed_size, DEFAULT_TRC20_ENERGY};
use super::account::builder::{check_native_funds, check_token_funds};
use super::account::erc20::transfer_params;
use super::{
    ChainError, ChainInfo, ChainResult, KeyMaterial, KeyVault, Operator, Query, SigningContext,
    TransferRequest, UnsignedTx, Wallet,
};
use crate::common::config::{AssetKind, ChainConfig};
use crate::types::{format_digits, parse_units, BlockOutput, BlockTx, ChainBlock};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on TRX burned by a TRC-20 call, in sun
pub const FEE_LIMIT_SUN: u64 = 100_000_000;

const TRANSFER_SELECTOR: &str = "transfer(address,uint256)";
const BALANCE_SELECTOR: &str = "balanceOf(address)";
const DECIMALS_SELECTOR: &str = "decimals()";

pub struct ResourceChain {
    tag: String,
    client: TronClient,
    decimals: u8,
}

/// 32-byte ABI word holding an address body
fn address_param(addr: &address::TronAddress) -> String {
    format!("{:0>64}", hex::encode(&addr[1..]))
}

/// Translate a Tron block into the ledger's block form (successful TRX transfers only)
pub fn convert_block(tag: &str, block: &TronBlock) -> ChainBlock {
    let txs = block
        .transactions
        .iter()
        .filter(|tx| {
            tx["ret"][0]["contractRet"]
                .as_str()
                .map_or(true, |ret| ret == "SUCCESS")
        })
        .filter_map(|tx| {
            let contract = &tx["raw_data"]["contract"][0];
            if contract["type"].as_str() != Some("TransferContract") {
                return None;
            }
            let value = &contract["parameter"]["value"];
            let to = value["to_address"].as_str()?;
            let to = address::decode(to).ok()?;

            Some(BlockTx {
                txid: tx["txID"].as_str()?.to_string(),
                inputs: Vec::new(),
                outputs: vec![BlockOutput {
                    vout: 0,
                    address: Some(address::encode(&to)),
                    amount: value["amount"].as_u64()? as u128,
                }],
            })
        })
        .collect();

    ChainBlock {
        chain: tag.to_string(),
        hash: block.block_id.clone(),
        height: block.block_header.raw_data.number,
        parent_hash: block.block_header.raw_data.parent_hash.clone(),
        txs,
    }
}

impl ResourceChain {
    pub fn new(config: &ChainConfig) -> ChainResult<Self> {
        Ok(Self {
            tag: config.tag.clone(),
            client: TronClient::new(&config.endpoint, REQUEST_TIMEOUT)?,
            decimals: config.decimals,
        })
    }

    async fn token_balance(&self, owner: &str, contract: &str) -> ChainResult<U256> {
        let param = address_param(&address::decode(owner)?);
        let call = self
            .client
            .trigger_constant(owner, contract, BALANCE_SELECTOR, &param)
            .await?;
        if call.output.len() < 32 {
            return Err(ChainError::rpc(format!("balanceOf returned {} bytes", call.output.len())));
        }
        Ok(U256::from_be_slice(&call.output[..32]))
    }

    async fn token_decimals(&self, owner: &str, contract: &str) -> ChainResult<u8> {
        let call = self
            .client
            .trigger_constant(owner, contract, DECIMALS_SELECTOR, "")
            .await?;
        call.output
            .get(31)
            .copied()
            .ok_or_else(|| ChainError::rpc("decimals() returned no data"))
    }
}

#[async_trait]
impl Query for ResourceChain {
    fn chain(&self) -> &str {
        &self.tag
    }

    async fn ledger(&self) -> ChainResult<ChainInfo> {
        let block = self.client.now_block().await?;
        Ok(ChainInfo {
            chain: self.tag.clone(),
            height: block.block_header.raw_data.number,
            best_hash: block.block_id,
        })
    }

    async fn balance(&self, account: &str, symbol: &str, contract: Option<&str>) -> ChainResult<String> {
        address::decode(account)?;

        match contract {
            None => {
                let sun = self.client.account(account).await?.balance;
                Ok(format_digits(&sun.to_string(), self.decimals))
            }
            Some(contract) => {
                address::decode(contract)?;
                let (balance, decimals) = tokio::try_join!(
                    self.token_balance(account, contract),
                    self.token_decimals(account, contract)
                )?;
                tracing::debug!(target: "custodia::chain", chain = %self.tag, symbol, %balance, "token balance");
                Ok(format_digits(&balance.to_string(), decimals))
            }
        }
    }

    async fn fetch_block(&self, height: u64) -> ChainResult<ChainBlock> {
        let block = self.client.block_by_num(height).await?;
        Ok(convert_block(&self.tag, &block))
    }
}

#[async_trait]
impl Operator for ResourceChain {
    async fn raw_tx(&self, request: &TransferRequest) -> ChainResult<UnsignedTx> {
        if request.asset.chain != self.tag {
            return Err(ChainError::UnsupportedAsset(format!(
                "{} is not carried on {}",
                request.asset.symbol, self.tag
            )));
        }

        let from = address::decode(&request.from)?;
        let to = address::decode(&request.to)?;
        let (owner, recipient) = (address::encode(&from), address::encode(&to));

        let (resources, prices) = tokio::try_join!(
            self.client.account_resources(&owner),
            self.client.resource_prices()
        )?;

        let (tx, amount, fee) = match &request.asset.kind {
            AssetKind::Native => {
                let amount = parse_units(&request.amount, self.decimals)?;
                let sun = u64::try_from(amount)
                    .map_err(|_| ChainError::InvalidAmount(format!("{} is out of range", request.amount)))?;

                let tx = self
                    .client
                    .create_transaction(&owner, &recipient, sun, request.memo.as_deref())
                    .await?;
                let fee = estimate_fee(signed_size(&tx.raw_data_hex), 0, &resources, &prices);

                let balance = self.client.account(&owner).await?.balance;
                check_native_funds(U256::from(balance), U256::from(amount), U256::from(fee))?;
                (tx, amount, fee)
            }
            AssetKind::Token { contract } => {
                let amount = parse_units(&request.amount, request.asset.decimals)?;
                let param = hex::encode(transfer_params(address::to_evm(&to), U256::from(amount)));

                let (simulated, token_balance, account) = tokio::try_join!(
                    self.client.trigger_constant(&owner, contract, TRANSFER_SELECTOR, &param),
                    self.token_balance(&owner, contract),
                    self.client.account(&owner)
                )?;
                let energy = match simulated.energy_used {
                    0 => DEFAULT_TRC20_ENERGY,
                    used => used,
                };

                let tx = self
                    .client
                    .trigger_smart_contract(&owner, contract, TRANSFER_SELECTOR, &param, FEE_LIMIT_SUN)
                    .await?;
                let fee = estimate_fee(signed_size(&tx.raw_data_hex), energy, &resources, &prices);

                check_token_funds(
                    token_balance,
                    U256::from(amount),
                    U256::from(account.balance),
                    U256::from(fee),
                )?;
                (tx, amount, fee)
            }
            AssetKind::Layered { .. } => {
                return Err(ChainError::UnsupportedAsset(format!(
                    "{} layered assets are not supported on {}",
                    request.asset.symbol, self.tag
                )))
            }
        };

        tracing::debug!(
            target: "custodia::chain",
            chain = %self.tag,
            txid = %tx.tx_id,
            fee,
            "built unsigned transaction"
        );

        Ok(UnsignedTx {
            hex: tx.to_hex()?,
            vin_amount: amount,
            fee: fee as u128,
            selected: Vec::new(),
        })
    }

    fn signed_tx(&self, unsigned_hex: &str, key: &KeyMaterial, ctx: &SigningContext) -> ChainResult<String> {
        signer::sign_transaction(unsigned_hex, key, ctx)
    }

    async fn broadcast_tx(&self, signed_hex: &str) -> ChainResult<String> {
        let tx = client::TronTransaction::from_hex(signed_hex)?;
        if tx.signature.is_empty() {
            return Err(ChainError::InvalidTransaction("transaction is not signed".to_string()));
        }
        self.client.broadcast(&tx).await
    }
}

impl Wallet for ResourceChain {
    fn create(&self, vault: &mut dyn KeyVault) -> ChainResult<String> {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(&mut rand::thread_rng());
        let address = address::encode(&address::from_public_key(&PublicKey::from_secret_key(&secp, &sk)));

        vault.insert(&self.key_id(&address)?, &sk.secret_bytes())?;
        Ok(address)
    }

    fn key_id(&self, address: &str) -> ChainResult<String> {
        Ok(format!("{}/{}", self.tag, address::encode(&address::decode(address)?)))
    }
}

/// Parse a block in the node's JSON form
pub fn parse_block(value: Value) -> ChainResult<TronBlock> {
    serde_json::from_value(value).map_err(|e| ChainError::InvalidTransaction(format!("block: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryVault;
    use crate::common::config::ChainKind;
    use serde_json::json;

    fn chain() -> ResourceChain {
        ResourceChain::new(&ChainConfig {
            tag: "trx".to_string(),
            kind: ChainKind::Resource,
            endpoint: "http://127.0.0.1:9090".to_string(),
            aux_endpoint: None,
            chain_id: 0,
            fee_target: 0,
            decimals: 6,
        })
        .unwrap()
    }

    #[test]
    fn test_convert_block_keeps_successful_transfers() {
        let block = parse_block(json!({
            "blockID": "00000000000003e8aa",
            "block_header": { "raw_data": { "number": 1000, "parentHash": "00000000000003e7bb" } },
            "transactions": [
                {
                    "txID": "t1",
                    "ret": [{ "contractRet": "SUCCESS" }],
                    "raw_data": { "contract": [{ "type": "TransferContract", "parameter": { "value": {
                        "owner_address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
                        "to_address": "41a614f803b6fd780986a42c78ec9c7f77e6ded13c",
                        "amount": 2500000
                    }}}]}
                },
                {
                    "txID": "t2",
                    "ret": [{ "contractRet": "REVERT" }],
                    "raw_data": { "contract": [{ "type": "TransferContract", "parameter": { "value": {
                        "to_address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
                        "amount": 1
                    }}}]}
                },
                {
                    "txID": "t3",
                    "raw_data": { "contract": [{ "type": "TriggerSmartContract", "parameter": { "value": {} } }] }
                }
            ]
        }))
        .unwrap();

        let converted = convert_block("trx", &block);
        assert_eq!(converted.height, 1000);
        assert_eq!(converted.parent_hash.as_deref(), Some("00000000000003e7bb"));
        assert_eq!(converted.txs.len(), 1);
        assert_eq!(converted.txs[0].txid, "t1");
        assert_eq!(
            converted.txs[0].outputs[0].address.as_deref(),
            Some("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t")
        );
        assert_eq!(converted.txs[0].outputs[0].amount, 2_500_000);
    }

    #[test]
    fn test_address_param_padding() {
        let addr = address::decode("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").unwrap();
        assert_eq!(
            address_param(&addr),
            "000000000000000000000000a614f803b6fd780986a42c78ec9c7f77e6ded13c"
        );
    }

    #[test]
    fn test_wallet_and_signing_through_adapter() {
        let adapter = chain();
        let mut vault = MemoryVault::new();
        let address = adapter.create(&mut vault).unwrap();
        assert!(address.starts_with('T'));

        let key = vault.get(&adapter.key_id(&address).unwrap()).unwrap();
        let from = address::decode(&address).unwrap();
        let tx = signer::tests::transfer(&from, 10);

        let ctx = SigningContext {
            chain_id: 0,
            from_address: address.clone(),
            vin_amount: 10,
        };
        let signed = adapter.signed_tx(&tx.to_hex().unwrap(), &key, &ctx).unwrap();
        assert_eq!(client::TronTransaction::from_hex(&signed).unwrap().signature.len(), 1);
    }

    #[test]
    fn test_key_id_normalizes_hex() {
        let adapter = chain();
        assert_eq!(
            adapter.key_id("41a614f803b6fd780986a42c78ec9c7f77e6ded13c").unwrap(),
            "trx/TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"
        );
    }
}
