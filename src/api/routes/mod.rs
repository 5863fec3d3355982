//! API route handlers

pub mod bots;
pub mod offers;
pub mod trades;
pub mod users;

use crate::services::CoordinatorError;
use crate::steam::TradeError;
use crate::store::StoreError;
use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::{error, warn};

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

pub(crate) fn database_error(e: anyhow::Error) -> ApiError {
    error!("[Api] Database error: {:#}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e))
}

pub(crate) fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e),
        other => {
            error!("[Api] Database error: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other)
        }
    }
}

pub(crate) fn coordinator_error(e: CoordinatorError) -> ApiError {
    match e {
        CoordinatorError::NoAvailableBot(_) => api_error(StatusCode::SERVICE_UNAVAILABLE, e),
        CoordinatorError::BotNotFound(_)
        | CoordinatorError::InvalidTransition { .. }
        | CoordinatorError::ReservationExpired(_) => api_error(StatusCode::CONFLICT, e),
        CoordinatorError::Trade(TradeError::InvalidTradeUrl(_)) => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, e)
        }
        CoordinatorError::Trade(other) => {
            warn!("[Api] Provider call failed: {}", other);
            api_error(StatusCode::BAD_GATEWAY, other)
        }
        CoordinatorError::Store(other) => store_error(other),
    }
}
