//! Axum HTTP server for the signing boundary
//!
//! Responses carry addresses and signed transactions only; key material
//! never leaves this process.

use crate::signing::{SigningError, SigningService};
use crate::types::{
    AddressRequest, AddressResponse, BootstrapResponse, ErrorResponse, HealthResponse, SignTxRequest,
    SignTxResponse,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use custodia::chain::ChainError;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
pub type AppState = Arc<SigningService>;

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/address", post(address_handler))
        .route("/sign", post(sign_handler))
        .route("/wallets/{chain}", post(bootstrap_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready".to_string(),
        network: state.network().to_string(),
        chains: state.chain_tags(),
    })
}

/// Mint a deposit address
async fn address_handler(
    State(state): State<AppState>,
    Json(request): Json<AddressRequest>,
) -> HandlerResult<AddressResponse> {
    state.new_address(&request.asset).await.map(Json).map_err(signing_error)
}

/// Sign an unsigned transaction
async fn sign_handler(
    State(state): State<AppState>,
    Json(request): Json<SignTxRequest>,
) -> HandlerResult<SignTxResponse> {
    let signed_hex = state.sign(&request).await.map_err(signing_error)?;
    Ok(Json(SignTxResponse { signed_hex }))
}

/// Per-chain wallet setup
async fn bootstrap_handler(
    State(state): State<AppState>,
    Path(chain): Path<String>,
) -> HandlerResult<BootstrapResponse> {
    state.bootstrap(&chain).await.map(Json).map_err(signing_error)
}

/// Convert signing error to HTTP response
fn signing_error(err: SigningError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        SigningError::UnknownAsset(_) | SigningError::UnknownChain(_) | SigningError::KeyNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        SigningError::Keystore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SigningError::Chain(ChainError::Vault(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        SigningError::Chain(ChainError::KeyNotFound(_)) => StatusCode::NOT_FOUND,
        SigningError::Chain(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(ErrorResponse::new(err.error_code(), err.to_string())))
}
