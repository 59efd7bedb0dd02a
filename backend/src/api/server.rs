//! API Server Module
//!
//! Application state, router and server startup.

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::middleware::{request_logging_middleware, security_headers_middleware};
use super::routes::{health, ledger, wallet};
use crate::common::config::Network;
use crate::service::WalletService;
use crate::sync::BlockBus;

/// Shared state behind every handler
pub struct AppState {
    pub wallet: Arc<WalletService>,
    /// Notifications received over HTTP are published here
    pub bus: Arc<BlockBus>,
    pub network: Network,
}

pub type SharedAppState = Arc<AppState>;

impl AppState {
    pub fn new(wallet: Arc<WalletService>, bus: Arc<BlockBus>, network: Network) -> SharedAppState {
        Arc::new(Self { wallet, bus, network })
    }
}

pub fn create_router(state: SharedAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health::handle_health))
        .route("/api/deposit-address", post(wallet::handle_deposit_address))
        .route("/api/withdraw", post(wallet::handle_withdraw))
        .route("/api/balance/{asset}/{address}", get(wallet::handle_balance))
        .route("/api/ledger/{chain}/stats", get(ledger::handle_stats))
        .route("/api/notify/{chain}", post(ledger::handle_notify))
        .layer(axum_middleware::from_fn(request_logging_middleware))
        .layer(axum_middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(state: SharedAppState, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(target: "custodia::api", %addr, "API listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::middleware::CORRELATION_HEADER;
    use crate::service::wallet::tests::service;
    use crate::storage::SqliteLedgerStore;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn app_state() -> SharedAppState {
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        let wallet = service(Arc::default(), Arc::default(), store);
        AppState::new(Arc::new(wallet), Arc::new(BlockBus::new()), Network::Regtest)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(app_state());

        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CORRELATION_HEADER));
        let body = json_body(response).await;
        assert_eq!(body["network"], "regtest");
        assert_eq!(body["chains"], serde_json::json!(["btc"]));
    }

    #[tokio::test]
    async fn test_deposit_address_then_stats() {
        let state = app_state();
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json("/api/deposit-address", serde_json::json!({"asset": "BTC"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["address"], "addr-0");
        assert_eq!(body["chain"], "btc");

        let response = app
            .oneshot(Request::builder().uri("/api/ledger/btc/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["tracked_addresses"], 1);
    }

    #[tokio::test]
    async fn test_withdraw_errors_carry_codes() {
        let app = create_router(app_state());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/withdraw",
                serde_json::json!({"asset": "BTC", "from": "nobody", "to": "dest", "amount": "1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "ADDRESS_NOT_TRACKED");

        let response = app
            .oneshot(Request::builder().uri("/api/balance/DOGE/abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], "UNKNOWN_ASSET");
    }

    #[tokio::test]
    async fn test_notify_publishes_on_bus() {
        let state = app_state();
        let mut queue = state.bus.bind("btc-sync", "btc").await;
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(post_json("/api/notify/btc", serde_json::json!({"height": 812})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["delivered"], 1);

        let notification = queue.recv().await.unwrap();
        assert_eq!(notification, crate::sync::BlockNotification::height("btc", 812));

        // Blocks are never taken from HTTP callers, only heights
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/notify/btc",
                serde_json::json!({"chain": "btc", "hash": "forged", "height": 813, "txs": []}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(queue.try_recv().is_err());

        let response = app
            .oneshot(post_json("/api/notify/ltc", serde_json::json!({"height": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
