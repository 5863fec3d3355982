//! Bot pool endpoint

use crate::api::server::AppState;
use crate::services::BotLoad;
use crate::steam::TradeOffers;
use axum::{extract::State, Json};

/// Logged-in bots and their current load
pub async fn list_bots<C: TradeOffers + 'static>(State(state): State<AppState<C>>) -> Json<Vec<BotLoad>> {
    Json(state.coordinator.pool().snapshot())
}
