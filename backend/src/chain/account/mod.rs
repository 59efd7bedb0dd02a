//! Account chain adapter (Ethereum + ERC-20)
//!
//! JSON-RPC through an alloy provider. Unsigned transactions are legacy
//! RLP lists; the signer applies EIP-155 with the configured chain id.

pub mod builder;
pub mod erc20;
pub mod nonce;
pub mod signer;

use alloy::{
    consensus::Transaction as _,
    eips::BlockNumberOrTag,
    network::TransactionResponse,
    primitives::{Address, Bytes, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::{
        client::RpcClient,
        types::{TransactionInput, TransactionRequest},
    },
    signers::local::PrivateKeySigner,
    transports::http::Http,
};
use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroizing;

use self::builder::{check_native_funds, check_token_funds, to_u128, UnsignedEvmTx, TRANSFER_GAS};
use self::erc20::{transfer_calldata, IERC20};
use self::nonce::{resolve_nonce, TxPoolContent};
use super::{
    ChainError, ChainInfo, ChainResult, KeyMaterial, KeyVault, Operator, Query, SigningContext,
    TransferRequest, UnsignedTx, Wallet,
};
use crate::common::config::{AssetKind, ChainConfig};
use crate::types::{format_digits, parse_units, BlockOutput, BlockTx, ChainBlock};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct AccountChain {
    tag: String,
    provider: DynProvider,
    chain_id: u64,
    decimals: u8,
}

pub fn parse_address(s: &str) -> ChainResult<Address> {
    Address::from_str(s.trim()).map_err(|e| ChainError::AddressDecode(format!("{}: {}", s, e)))
}

impl AccountChain {
    pub fn new(config: &ChainConfig) -> ChainResult<Self> {
        let url: url::Url = config
            .endpoint
            .parse()
            .map_err(|e| ChainError::rpc(format!("invalid RPC URL {}: {}", config.endpoint, e)))?;

        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let client = RpcClient::new(Http::with_client(http, url), false);
        let provider = ProviderBuilder::new().connect_client(client).erased();

        Ok(Self {
            tag: config.tag.clone(),
            provider,
            chain_id: config.chain_id,
            decimals: config.decimals,
        })
    }

    async fn native_balance(&self, owner: Address) -> ChainResult<U256> {
        self.provider.get_balance(owner).await.map_err(ChainError::rpc)
    }

    async fn token_balance(&self, contract: Address, owner: Address) -> ChainResult<U256> {
        IERC20::new(contract, self.provider.clone())
            .balanceOf(owner)
            .call()
            .await
            .map_err(ChainError::rpc)
    }

    /// Pending count, raised past anything the pool already holds for `sender`
    async fn next_nonce(&self, sender: Address) -> ChainResult<u64> {
        let pending = self
            .provider
            .get_transaction_count(sender)
            .pending()
            .await
            .map_err(ChainError::rpc)?;

        match self
            .provider
            .raw_request::<_, TxPoolContent>("txpool_content".into(), ())
            .await
        {
            Ok(pool) => Ok(resolve_nonce(pending, &pool, sender)),
            Err(e) => {
                tracing::warn!(
                    target: "custodia::chain",
                    chain = %self.tag,
                    error = %e,
                    "txpool_content unavailable, using pending nonce"
                );
                Ok(pending)
            }
        }
    }
}

#[async_trait]
impl Query for AccountChain {
    fn chain(&self) -> &str {
        &self.tag
    }

    async fn ledger(&self) -> ChainResult<ChainInfo> {
        let height = self.provider.get_block_number().await.map_err(ChainError::rpc)?;
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .await
            .map_err(ChainError::rpc)?
            .ok_or(ChainError::BlockNotFound(height))?;

        Ok(ChainInfo {
            chain: self.tag.clone(),
            height,
            best_hash: block.header.hash.to_string(),
        })
    }

    async fn balance(&self, account: &str, symbol: &str, contract: Option<&str>) -> ChainResult<String> {
        let owner = parse_address(account)?;

        match contract {
            None => {
                let wei = self.native_balance(owner).await?;
                Ok(format_digits(&wei.to_string(), self.decimals))
            }
            Some(contract) => {
                let contract = parse_address(contract)?;
                let token = IERC20::new(contract, self.provider.clone());
                let (balance, decimals) = tokio::try_join!(
                    async { token.balanceOf(owner).call().await.map_err(ChainError::rpc) },
                    async { token.decimals().call().await.map_err(ChainError::rpc) },
                )?;

                tracing::debug!(target: "custodia::chain", chain = %self.tag, symbol, %balance, "token balance");
                Ok(format_digits(&balance.to_string(), decimals))
            }
        }
    }

    async fn fetch_block(&self, height: u64) -> ChainResult<ChainBlock> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .full()
            .await
            .map_err(ChainError::rpc)?
            .ok_or(ChainError::BlockNotFound(height))?;

        // Native value transfers only; contract calls carry their amount in logs
        let txs = block
            .transactions
            .txns()
            .filter(|tx| !(**tx).value().is_zero())
            .filter_map(|tx| {
                let to = tx.to()?;
                let amount = u128::try_from(tx.value()).ok()?;
                Some(BlockTx {
                    txid: tx.tx_hash().to_string(),
                    inputs: Vec::new(),
                    outputs: vec![BlockOutput {
                        vout: 0,
                        address: Some(to.to_checksum(None)),
                        amount,
                    }],
                })
            })
            .collect();

        Ok(ChainBlock {
            chain: self.tag.clone(),
            hash: block.header.hash.to_string(),
            height,
            parent_hash: Some(block.header.parent_hash.to_string()),
            txs,
        })
    }
}

#[async_trait]
impl Operator for AccountChain {
    async fn raw_tx(&self, request: &TransferRequest) -> ChainResult<UnsignedTx> {
        if request.asset.chain != self.tag {
            return Err(ChainError::UnsupportedAsset(format!(
                "{} is not carried on {}",
                request.asset.symbol, self.tag
            )));
        }

        let from = parse_address(&request.from)?;
        let to = parse_address(&request.to)?;

        let (gas_price, nonce) = tokio::try_join!(
            async { self.provider.get_gas_price().await.map_err(ChainError::rpc) },
            self.next_nonce(from),
        )?;

        let (unsigned, amount) = match &request.asset.kind {
            AssetKind::Native => {
                let amount = U256::from(parse_units(&request.amount, self.decimals)?);
                let unsigned = UnsignedEvmTx {
                    nonce,
                    gas_price,
                    gas_limit: TRANSFER_GAS,
                    to,
                    value: amount,
                    input: Bytes::new(),
                };

                let balance = self.native_balance(from).await?;
                check_native_funds(balance, amount, unsigned.fee())?;
                (unsigned, amount)
            }
            AssetKind::Token { contract } => {
                let contract = parse_address(contract)?;
                let amount = U256::from(parse_units(&request.amount, request.asset.decimals)?);
                let data = transfer_calldata(to, amount);

                let call = TransactionRequest::default()
                    .from(from)
                    .to(contract)
                    .input(TransactionInput::new(data.clone()));
                let (gas_limit, token_balance, native_balance) = tokio::try_join!(
                    async { self.provider.estimate_gas(call).await.map_err(ChainError::rpc) },
                    self.token_balance(contract, from),
                    self.native_balance(from),
                )?;

                let unsigned = UnsignedEvmTx {
                    nonce,
                    gas_price,
                    gas_limit,
                    to: contract,
                    value: U256::ZERO,
                    input: data,
                };
                check_token_funds(token_balance, amount, native_balance, unsigned.fee())?;
                (unsigned, amount)
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
            nonce,
            gas_limit = unsigned.gas_limit,
            gas_price,
            "built unsigned transaction"
        );

        Ok(UnsignedTx {
            fee: to_u128(unsigned.fee())?,
            vin_amount: to_u128(amount)?,
            hex: unsigned.to_hex(),
            selected: Vec::new(),
        })
    }

    fn signed_tx(&self, unsigned_hex: &str, key: &KeyMaterial, ctx: &SigningContext) -> ChainResult<String> {
        if ctx.chain_id != self.chain_id {
            return Err(ChainError::Signing(format!(
                "chain id {} does not match configured {}",
                ctx.chain_id, self.chain_id
            )));
        }
        signer::sign_legacy(unsigned_hex, key, ctx)
    }

    async fn broadcast_tx(&self, signed_hex: &str) -> ChainResult<String> {
        let raw = hex::decode(signed_hex.trim().trim_start_matches("0x"))
            .map_err(|e| ChainError::InvalidTransaction(format!("hex: {}", e)))?;

        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| ChainError::Rejected(e.to_string()))?;
        Ok(pending.tx_hash().to_string())
    }
}

impl Wallet for AccountChain {
    fn create(&self, vault: &mut dyn KeyVault) -> ChainResult<String> {
        let signer = PrivateKeySigner::random();
        let address = signer.address();
        let secret = Zeroizing::new(signer.to_bytes().0);

        vault.insert(&self.key_id(&address.to_string())?, &secret[..])?;
        Ok(address.to_checksum(None))
    }

    fn key_id(&self, address: &str) -> ChainResult<String> {
        let address = parse_address(address)?;
        Ok(format!("{}/0x{}", self.tag, hex::encode(address.as_slice())))
    }
}
