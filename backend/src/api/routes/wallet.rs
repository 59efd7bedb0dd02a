//! Deposit, withdraw and balance endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use super::ApiResult;
use crate::api::server::SharedAppState;
use crate::service::{AddressRequest, BalanceView, WithdrawReceipt, WithdrawRequest};

#[derive(Debug, Serialize)]
pub struct DepositAddressResponse {
    pub address: String,
    pub asset: String,
    pub chain: String,
}

/// POST /api/deposit-address
pub async fn handle_deposit_address(
    State(state): State<SharedAppState>,
    Json(req): Json<AddressRequest>,
) -> ApiResult<DepositAddressResponse> {
    let tracked = state.wallet.deposit_address(&req.asset).await?;

    Ok(Json(DepositAddressResponse {
        address: tracked.address,
        asset: tracked.asset,
        chain: tracked.chain,
    }))
}

/// POST /api/withdraw
///
/// Builds, signs and broadcasts a single-recipient transfer. The response
/// carries the txid; confirmation is observed by the ledger synchronizer.
pub async fn handle_withdraw(
    State(state): State<SharedAppState>,
    Json(req): Json<WithdrawRequest>,
) -> ApiResult<WithdrawReceipt> {
    Ok(Json(state.wallet.withdraw(req).await?))
}

/// GET /api/balance/{asset}/{address}
pub async fn handle_balance(
    State(state): State<SharedAppState>,
    Path((asset, address)): Path<(String, String)>,
) -> ApiResult<BalanceView> {
    Ok(Json(state.wallet.balance(&asset, &address).await?))
}
