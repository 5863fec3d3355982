//! Axum server setup and configuration

use crate::api::routes;
use crate::services::OfferCoordinator;
use crate::steam::{TradeOfferClient, TradeOffers};
use crate::Database;
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state
pub struct AppState<C = TradeOfferClient> {
    pub db: Arc<Database>,
    pub coordinator: Arc<OfferCoordinator<Database, C>>,
}

impl<C> AppState<C> {
    pub fn new(db: Arc<Database>, coordinator: Arc<OfferCoordinator<Database, C>>) -> Self {
        Self { db, coordinator }
    }
}

// Not derived: the bot client itself is never cloned
impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            coordinator: self.coordinator.clone(),
        }
    }
}

/// Create the Axum application with all routes
pub fn create_app<C: TradeOffers + 'static>(state: AppState<C>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let api_routes = Router::new()
        // Offer routes
        .route(
            "/offers",
            get(routes::offers::list_offers::<C>).post(routes::offers::create_listing::<C>),
        )
        .route("/offers/reserve", post(routes::offers::reserve::<C>))
        .route("/offers/:offer_id", get(routes::offers::get_offer::<C>))
        .route("/offers/:offer_id/purchase", post(routes::offers::purchase::<C>))
        .route(
            "/offers/:offer_id/transactions",
            get(routes::offers::offer_transactions::<C>),
        )
        // Provider trade offer routes
        .route("/trades/:provider_offer_id/cancel", post(routes::trades::cancel::<C>))
        .route("/trades/:provider_offer_id/status", get(routes::trades::status::<C>))
        // Registries
        .route("/users", post(routes::users::upsert_user::<C>))
        .route(
            "/users/:steam_id/transactions",
            get(routes::users::user_transactions::<C>),
        )
        .route("/bots", get(routes::bots::list_bots::<C>));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
