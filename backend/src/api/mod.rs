//! API Layer Module
//!
//! HTTP ingress for the backend: deposit addresses, withdrawals, balances,
//! ledger stats and block notifications.

pub mod middleware;
pub mod routes;
pub mod server;

// Re-exports for convenience
pub use routes::ApiError;
pub use server::{create_router, start_server, AppState, SharedAppState};
