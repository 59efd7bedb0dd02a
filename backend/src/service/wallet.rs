//! Deposit and withdraw flows
//!
//! Withdraw: load spendable outputs → `raw_tx` → signing boundary →
//! `broadcast_tx` → mark the consumed outputs `selected`. Nothing in the
//! ledger changes unless the broadcast succeeded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::rpc::SignTxRequest;
use super::signer_client::SigningBoundary;
use super::{ServiceError, ServiceResult};
use crate::chain::{ChainAdapter, Operator, Query, TransferRequest};
use crate::common::config::{AssetConfig, ChainConfig, ChainKind};
use crate::common::logging::{generate_correlation_id, log_deposit_event, log_withdrawal_event, WithdrawalLog};
use crate::storage::LedgerStore;
use crate::types::{format_units, LedgerStats, OutPointRef, TrackedAddress};

/// A configured chain and its adapter
#[derive(Clone)]
pub struct ChainHandle {
    pub adapter: Arc<dyn ChainAdapter>,
    pub kind: ChainKind,
    pub chain_id: u64,
    /// Native coin decimals, for reporting fees
    pub decimals: u8,
}

impl ChainHandle {
    pub fn new(config: &ChainConfig, adapter: Arc<dyn ChainAdapter>) -> Self {
        Self {
            adapter,
            kind: config.kind,
            chain_id: config.chain_id,
            decimals: config.decimals,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawRequest {
    pub asset: String,
    pub from: String,
    pub to: String,
    /// Decimal amount in whole units of the asset
    pub amount: String,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawReceipt {
    pub request_id: String,
    pub asset: String,
    pub txid: String,
    /// In the chain's native coin
    pub fee: String,
    pub selected: Vec<OutPointRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub asset: String,
    pub chain: String,
    pub address: String,
    pub balance: String,
}

pub struct WalletService {
    assets: Vec<AssetConfig>,
    chains: HashMap<String, ChainHandle>,
    store: Arc<dyn LedgerStore>,
    signer: Arc<dyn SigningBoundary>,
}

impl WalletService {
    pub fn new(assets: Vec<AssetConfig>, store: Arc<dyn LedgerStore>, signer: Arc<dyn SigningBoundary>) -> Self {
        Self {
            assets,
            chains: HashMap::new(),
            store,
            signer,
        }
    }

    pub fn with_chain(mut self, tag: &str, handle: ChainHandle) -> Self {
        self.chains.insert(tag.to_string(), handle);
        self
    }

    pub fn asset(&self, symbol: &str) -> ServiceResult<&AssetConfig> {
        self.assets
            .iter()
            .find(|a| a.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ServiceError::UnknownAsset(symbol.to_string()))
    }

    pub fn chain(&self, tag: &str) -> ServiceResult<&ChainHandle> {
        self.chains
            .get(tag)
            .ok_or_else(|| ServiceError::UnknownChain(tag.to_string()))
    }

    pub fn chain_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.chains.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Mint a deposit address through the signing boundary and start tracking it
    pub async fn deposit_address(&self, symbol: &str) -> ServiceResult<TrackedAddress> {
        let asset = self.asset(symbol)?.clone();
        self.chain(&asset.chain)?;

        let minted = match self.signer.new_address(&asset.symbol).await {
            Ok(minted) => minted,
            Err(e) => {
                log_deposit_event("deposit_address_failed", &asset.symbol, "", false, Some(&e.to_string()));
                return Err(e);
            }
        };
        if minted.chain != asset.chain {
            return Err(ServiceError::InvalidRequest(format!(
                "signer minted a {} address for {}",
                minted.chain, asset.symbol
            )));
        }

        let tracked = TrackedAddress::new(minted.address, asset.symbol.clone(), asset.chain.clone());
        self.store.track_address(&tracked).await?;

        log_deposit_event("deposit_address_created", &asset.symbol, &tracked.address, true, None);
        Ok(tracked)
    }

    pub async fn balance(&self, symbol: &str, address: &str) -> ServiceResult<BalanceView> {
        let asset = self.asset(symbol)?;
        let handle = self.chain(&asset.chain)?;

        let balance = handle
            .adapter
            .balance(address, &asset.symbol, asset.contract_ref().as_deref())
            .await?;

        Ok(BalanceView {
            asset: asset.symbol.clone(),
            chain: asset.chain.clone(),
            address: address.to_string(),
            balance,
        })
    }

    pub async fn ledger_stats(&self, chain: &str) -> ServiceResult<LedgerStats> {
        self.chain(chain)?;
        Ok(self.store.stats(chain).await?)
    }

    pub async fn withdraw(&self, request: WithdrawRequest) -> ServiceResult<WithdrawReceipt> {
        let request_id = request.request_id.clone().unwrap_or_else(generate_correlation_id);

        match self.try_withdraw(&request, &request_id).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                let error = e.to_string();
                log_withdrawal_event(
                    "withdrawal_failed",
                    WithdrawalLog {
                        request_id: &request_id,
                        asset: &request.asset,
                        amount: &request.amount,
                        destination: &request.to,
                        txid: None,
                        error: Some(&error),
                    },
                );
                Err(e)
            }
        }
    }

    async fn try_withdraw(&self, request: &WithdrawRequest, request_id: &str) -> ServiceResult<WithdrawReceipt> {
        let asset = self.asset(&request.asset)?.clone();
        let handle = self.chain(&asset.chain)?;

        if !self.store.is_tracked(&asset.chain, &request.from).await? {
            return Err(ServiceError::NotTracked(request.from.clone()));
        }

        let utxos = match handle.kind {
            ChainKind::Utxo => self.store.spendable_outputs(&asset.chain, &request.from).await?,
            ChainKind::Account | ChainKind::Resource => Vec::new(),
        };

        let unsigned = handle
            .adapter
            .raw_tx(&TransferRequest {
                from: request.from.clone(),
                to: request.to.clone(),
                amount: request.amount.clone(),
                memo: request.memo.clone(),
                asset: asset.clone(),
                utxos,
            })
            .await?;

        let signed_hex = self
            .signer
            .sign_tx(&SignTxRequest {
                asset: asset.symbol.clone(),
                from: request.from.clone(),
                unsigned_hex: unsigned.hex.clone(),
                vin_amount: unsigned.vin_amount,
                chain_id: handle.chain_id,
            })
            .await?;

        let txid = handle.adapter.broadcast_tx(&signed_hex).await?;

        if !unsigned.selected.is_empty() {
            // Already on the network; the synchronizer will mark them spent if this fails
            if let Err(e) = self.store.mark_selected(&unsigned.selected).await {
                tracing::error!(
                    target: "custodia::withdrawal",
                    request_id,
                    txid = %txid,
                    error = %e,
                    "broadcast succeeded but outputs could not be marked selected"
                );
            }
        }

        log_withdrawal_event(
            "withdrawal_broadcast",
            WithdrawalLog {
                request_id,
                asset: &asset.symbol,
                amount: &request.amount,
                destination: &request.to,
                txid: Some(&txid),
                error: None,
            },
        );

        Ok(WithdrawReceipt {
            request_id: request_id.to_string(),
            asset: asset.symbol,
            txid,
            fee: format_units(unsigned.fee, handle.decimals),
            selected: unsigned.selected,
        })
    }
}
