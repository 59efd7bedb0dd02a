//! API Routes Module
//!
//! Route handlers organized by domain:
//! - health: liveness and configured chains
//! - wallet: deposit addresses, withdrawals, balances
//! - ledger: ledger stats and block notifications

pub mod health;
pub mod ledger;
pub mod wallet;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::service::{ErrorResponse, ServiceError};

/// Handler error: a [`ServiceError`] rendered as `{error, code}`
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::UnknownAsset(_) | ServiceError::UnknownChain(_) => StatusCode::NOT_FOUND,
            ServiceError::NotTracked(_) | ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Chain(e) if e.is_retryable() => StatusCode::BAD_GATEWAY,
            ServiceError::Chain(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Signer { .. } => StatusCode::BAD_GATEWAY,
            ServiceError::SignerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E: Into<ServiceError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse::new(self.0.error_code(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;
