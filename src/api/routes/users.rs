//! User registry endpoints

use super::{database_error, ApiError, ErrorResponse};
use crate::api::server::AppState;
use crate::steam::{TradeOffers, TradeUrl};
use crate::types::{TransactionRecord, User};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

/// Register a user or update their trade URL
pub async fn upsert_user<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Json(user): Json<User>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    TradeUrl::parse(&user.trade_url).map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse { error: e.to_string() }),
        )
    })?;

    state.db.upsert_user(&user).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Database error: {}", e),
            }),
        )
    })?;

    info!("[Api] User {} registered", user.steam_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Purchases made by a user, newest first
pub async fn user_transactions<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Path(steam_id): Path<String>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let records = state
        .db
        .transactions_for_buyer(&steam_id)
        .await
        .map_err(database_error)?;
    Ok(Json(records))
}
