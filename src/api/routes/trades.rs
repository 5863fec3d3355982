//! Provider trade offer endpoints

use super::{coordinator_error, ApiError};
use crate::api::server::AppState;
use crate::steam::{TradeOfferState, TradeOffers};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

/// Trade offer status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub provider_offer_id: String,
    pub state: TradeOfferState,
}

/// Cancel the bot's incoming trade offer and mark the listing canceled
pub async fn cancel<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Path(provider_offer_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .cancel(&provider_offer_id)
        .await
        .map_err(coordinator_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Provider-side state of a trade offer
pub async fn status<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Path(provider_offer_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let trade_state = state
        .coordinator
        .status(&provider_offer_id)
        .await
        .map_err(coordinator_error)?;
    Ok(Json(StatusResponse {
        provider_offer_id,
        state: trade_state,
    }))
}
