//! UTXO chain adapter (Bitcoin + Omni layer)
//!
//! Reads go to Esplora; Omni balances go to an optional Omni Core node.
//! Transactions are legacy P2PKH so the signer can verify every input
//! without the previous outputs' scripts beyond the source address.

pub mod builder;
pub mod esplora;
pub mod omni;
pub mod selector;
pub mod signer;
pub mod wallet;

use async_trait::async_trait;
use bitcoin::{Address, Block};
use std::time::Duration;

use self::builder::{BuildRequest, Payment, UtxoTxBuilder};
use self::esplora::{pick_fee_rate, EsploraClient, EsploraError};
use self::omni::OmniClient;
use self::selector::SelectionParams;
use self::wallet::HdWallet;
use super::{
    ChainError, ChainInfo, ChainResult, KeyMaterial, KeyVault, Operator, Query, SigningContext,
    TransferRequest, UnsignedTx, Wallet,
};
use crate::common::config::{AssetKind, ChainConfig, Network};
use crate::types::{format_units, parse_units, BlockOutput, BlockTx, ChainBlock, OutPointRef};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

impl From<EsploraError> for ChainError {
    fn from(e: EsploraError) -> Self {
        match e {
            EsploraError::HttpError(e) if e.is_timeout() => ChainError::Timeout,
            EsploraError::HttpError(e) => ChainError::Http(e),
            EsploraError::BroadcastFailed(msg) => ChainError::Rejected(msg),
            other => ChainError::rpc(other),
        }
    }
}

pub struct UtxoChain {
    tag: String,
    network: bitcoin::Network,
    esplora: EsploraClient,
    omni: Option<OmniClient>,
    fee_target: u16,
    decimals: u8,
    builder: UtxoTxBuilder,
    wallet: HdWallet,
}

impl UtxoChain {
    /// No network I/O happens here; clients connect lazily
    pub fn new(config: &ChainConfig, network: Network) -> ChainResult<Self> {
        let btc_network = network.bitcoin_network();
        let omni = config
            .aux_endpoint
            .as_deref()
            .map(|endpoint| OmniClient::new(endpoint, REQUEST_TIMEOUT))
            .transpose()?;

        Ok(Self {
            tag: config.tag.clone(),
            network: btc_network,
            esplora: EsploraClient::new(&config.endpoint, REQUEST_TIMEOUT)?,
            omni,
            fee_target: config.fee_target,
            decimals: config.decimals,
            builder: UtxoTxBuilder::new(btc_network, SelectionParams::default()),
            wallet: HdWallet::new(&config.tag, btc_network, network.bip44_coin_type()),
        })
    }

    fn sats(&self, amount: &str, decimals: u8) -> ChainResult<u64> {
        let units = parse_units(amount, decimals)?;
        u64::try_from(units).map_err(|_| ChainError::InvalidAmount(format!("{} is out of range", amount)))
    }

    async fn fee_rate(&self) -> ChainResult<f64> {
        let estimates = self.esplora.get_fee_estimates().await?;
        pick_fee_rate(&estimates, self.fee_target).ok_or_else(|| {
            ChainError::FeeEstimateUnavailable(format!("no estimate for {} blocks", self.fee_target))
        })
    }
}

/// Translate a decoded Bitcoin block into the ledger's block form
pub fn convert_block(tag: &str, height: u64, block: &Block, network: bitcoin::Network) -> ChainBlock {
    let txs = block
        .txdata
        .iter()
        .map(|tx| {
            let inputs = if tx.is_coinbase() {
                Vec::new()
            } else {
                tx.input
                    .iter()
                    .map(|i| OutPointRef::new(i.previous_output.txid.to_string(), i.previous_output.vout))
                    .collect()
            };

            let outputs = tx
                .output
                .iter()
                .enumerate()
                .map(|(vout, out)| BlockOutput {
                    vout: vout as u32,
                    address: Address::from_script(&out.script_pubkey, network)
                        .ok()
                        .map(|a| a.to_string()),
                    amount: out.value.to_sat() as u128,
                })
                .collect();

            BlockTx {
                txid: tx.compute_txid().to_string(),
                inputs,
                outputs,
            }
        })
        .collect();

    ChainBlock {
        chain: tag.to_string(),
        hash: block.block_hash().to_string(),
        height,
        parent_hash: Some(block.header.prev_blockhash.to_string()),
        txs,
    }
}

#[async_trait]
impl Query for UtxoChain {
    fn chain(&self) -> &str {
        &self.tag
    }

    async fn ledger(&self) -> ChainResult<ChainInfo> {
        let height = self.esplora.get_block_height().await?;
        let best_hash = self.esplora.get_block_hash(height).await?;
        Ok(ChainInfo {
            chain: self.tag.clone(),
            height,
            best_hash,
        })
    }

    async fn balance(&self, account: &str, symbol: &str, contract: Option<&str>) -> ChainResult<String> {
        self.builder.validate_address(account)?;

        match contract {
            None => {
                let sats = self.esplora.get_address_balance(account).await?;
                Ok(format_units(sats as u128, self.decimals))
            }
            Some(property) => {
                let property_id: u32 = property
                    .parse()
                    .map_err(|_| ChainError::UnsupportedAsset(format!("{}: bad property id {}", symbol, property)))?;
                let omni = self
                    .omni
                    .as_ref()
                    .ok_or_else(|| ChainError::UnsupportedAsset(format!("{}: no Omni endpoint configured", symbol)))?;
                omni.get_balance(account, property_id).await
            }
        }
    }

    async fn fetch_block(&self, height: u64) -> ChainResult<ChainBlock> {
        let hash = match self.esplora.get_block_hash(height).await {
            Ok(hash) => hash,
            Err(EsploraError::NotFound(_)) => return Err(ChainError::BlockNotFound(height)),
            Err(e) => return Err(e.into()),
        };
        let block = self.esplora.get_block(&hash).await?;
        Ok(convert_block(&self.tag, height, &block, self.network))
    }
}

#[async_trait]
impl Operator for UtxoChain {
    async fn raw_tx(&self, request: &TransferRequest) -> ChainResult<UnsignedTx> {
        if request.asset.chain != self.tag {
            return Err(ChainError::UnsupportedAsset(format!(
                "{} is not carried on {}",
                request.asset.symbol, self.tag
            )));
        }

        let payment = match &request.asset.kind {
            AssetKind::Native => Payment::Native {
                amount: self.sats(&request.amount, self.decimals)?,
            },
            AssetKind::Layered { property_id } => Payment::Omni {
                property_id: *property_id,
                amount: self.sats(&request.amount, request.asset.decimals)?,
            },
            AssetKind::Token { .. } => {
                return Err(ChainError::UnsupportedAsset(format!(
                    "{} tokens are not supported on {}",
                    request.asset.symbol, self.tag
                )))
            }
        };

        // Fail on bad addresses before touching the network
        self.builder.validate_address(&request.from)?;
        self.builder.validate_address(&request.to)?;

        let (fee_rate, tip_height) = tokio::try_join!(self.fee_rate(), async {
            self.esplora.get_block_height().await.map_err(ChainError::from)
        })?;

        let built = self.builder.build(&BuildRequest {
            from: &request.from,
            to: &request.to,
            payment,
            candidates: &request.utxos,
            tip_height,
            fee_rate,
        })?;

        tracing::debug!(
            target: "custodia::chain",
            chain = %self.tag,
            inputs = built.selected.len(),
            fee = built.fee,
            fee_rate,
            "built unsigned transaction"
        );

        Ok(UnsignedTx {
            hex: built.to_hex(),
            vin_amount: built.vin_amount as u128,
            fee: built.fee as u128,
            selected: built.selected.iter().map(|u| u.outpoint()).collect(),
        })
    }

    fn signed_tx(&self, unsigned_hex: &str, key: &KeyMaterial, ctx: &SigningContext) -> ChainResult<String> {
        signer::sign_transaction(unsigned_hex, key, ctx, self.network)
    }

    async fn broadcast_tx(&self, signed_hex: &str) -> ChainResult<String> {
        Ok(self.esplora.broadcast_tx(signed_hex).await?)
    }
}

impl Wallet for UtxoChain {
    fn create(&self, vault: &mut dyn KeyVault) -> ChainResult<String> {
        self.wallet.create(vault)
    }

    fn key_id(&self, address: &str) -> ChainResult<String> {
        self.builder.validate_address(address)?;
        Ok(self.wallet.key_id(address))
    }

    fn bootstrap(&self, vault: &mut dyn KeyVault) -> ChainResult<()> {
        self.wallet.bootstrap(vault)
    }
}
