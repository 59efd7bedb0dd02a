//! Ledger stats and block notification ingress

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::ApiResult;
use crate::api::server::SharedAppState;
use crate::sync::BlockNotification;
use crate::types::LedgerStats;

/// GET /api/ledger/{chain}/stats
pub async fn handle_stats(
    State(state): State<SharedAppState>,
    Path(chain): Path<String>,
) -> ApiResult<LedgerStats> {
    Ok(Json(state.wallet.ledger_stats(&chain).await?))
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub chain: String,
    pub height: u64,
    /// Queues the notification was delivered to
    pub delivered: usize,
}

/// Body of `POST /api/notify/{chain}`
///
/// Only the tip height is accepted over HTTP; the synchronizer fetches the
/// block from its own node. Full-block payloads stay on the in-process bus.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyRequest {
    pub height: u64,
}

/// POST /api/notify/{chain}
pub async fn handle_notify(
    State(state): State<SharedAppState>,
    Path(chain): Path<String>,
    Json(request): Json<NotifyRequest>,
) -> ApiResult<NotifyResponse> {
    state.wallet.chain(&chain)?;

    let delivered = state
        .bus
        .publish(&chain, BlockNotification::height(chain.clone(), request.height))
        .await;

    Ok(Json(NotifyResponse {
        chain,
        height: request.height,
        delivered,
    }))
}
