use axum::{extract::State, response::IntoResponse, Json};

use crate::api::server::SharedAppState;

/// GET /api/health
pub async fn handle_health(State(state): State<SharedAppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "custodia",
        "version": env!("CARGO_PKG_VERSION"),
        "network": state.network.to_string(),
        "chains": state.wallet.chain_tags(),
    }))
}
