//! Offer API endpoints

use super::{api_error, coordinator_error, database_error, store_error, ApiError};
use crate::api::server::AppState;
use crate::services::{PurchaseRequest, ReserveRequest};
use crate::steam::TradeOffers;
use crate::store::OfferStore;
use crate::types::{NewOffer, Offer, TransactionRecord};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Reserve response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub offer_id: Uuid,
}

/// Listing filter
#[derive(Debug, Deserialize)]
pub struct ListOffersQuery {
    pub seller_id: Option<String>,
}

/// Purchase body; the offer comes from the path
#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    pub buyer_id: String,
}

/// Reserve a new listing or an existing on-sale offer
pub async fn reserve<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let offer_id = state.coordinator.reserve(req).await.map_err(coordinator_error)?;
    Ok(Json(ReserveResponse { offer_id }))
}

/// Hand a reserved item to the buyer
pub async fn purchase<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Path(offer_id): Path<Uuid>,
    Json(body): Json<PurchaseBody>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .purchase(PurchaseRequest {
            offer_id,
            buyer_id: body.buyer_id,
        })
        .await
        .map_err(coordinator_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_offer<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<Offer>, ApiError> {
    let offer = state.db.offer(offer_id).await.map_err(store_error)?;
    Ok(Json(offer))
}

/// Every offer, or one seller's offers, newest first
pub async fn list_offers<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Query(query): Query<ListOffersQuery>,
) -> Result<Json<Vec<Offer>>, ApiError> {
    let offers = match query.seller_id {
        Some(seller_id) => state.db.offers_by_seller(&seller_id).await,
        None => state.db.all_offers().await,
    }
    .map_err(database_error)?;
    Ok(Json(offers))
}

/// List an item for sale without binding a bot yet
pub async fn create_listing<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Json(listing): Json<NewOffer>,
) -> Result<(StatusCode, Json<ReserveResponse>), ApiError> {
    if listing.price <= Decimal::ZERO {
        return Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, "price must be positive"));
    }
    state
        .db
        .user_trade_url(&listing.seller_id)
        .await
        .map_err(store_error)?;

    let offer_id = state.db.create_listing(&listing).await.map_err(database_error)?;
    info!(
        "[Api] Offer {} listed by {} ({} at {})",
        offer_id, listing.seller_id, listing.market_name, listing.price
    );
    Ok((StatusCode::CREATED, Json(ReserveResponse { offer_id })))
}

/// Purchase records of one offer
pub async fn offer_transactions<C: TradeOffers + 'static>(
    State(state): State<AppState<C>>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    state.db.offer(offer_id).await.map_err(store_error)?;
    let records = state
        .db
        .transactions_for_offer(offer_id)
        .await
        .map_err(database_error)?;
    Ok(Json(records))
}
