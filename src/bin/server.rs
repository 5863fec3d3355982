//! Marketplace bot web server
//!
//! Logs every stored bot in, serves the offer API and runs the reservation sweeper.

use anyhow::{Context, Result};
use cstrade_bot::api::{create_app, AppState};
use cstrade_bot::services::{BotPool, OfferCoordinator, ReservationSweeper};
use cstrade_bot::store::OfferStore;
use cstrade_bot::{Config, Database};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Override with RUST_LOG, e.g. RUST_LOG=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("BIND_ADDR {:?} is not a socket address", config.bind_addr))?;

    let db = Arc::new(
        Database::new(&config.database_path)
            .await
            .with_context(|| format!("opening {}", config.database_path))?,
    );

    // Log the bots in; failed bots are left out of the pool
    let bots = db.load_bots(config.passphrase()?).await?;
    info!("Logging in {} bots...", bots.len());
    let pool = Arc::new(BotPool::initialize(bots, config.session_settings()).await);
    if pool.is_empty() {
        warn!("No bot logged in, reservations will fail until the server is restarted with working bots");
    }

    // Loads reflect reservations that survived the last run
    pool.seed_loads(&db.reserved_counts().await?);

    let coordinator = OfferCoordinator::new(db.clone(), pool.clone(), config.reservation_window());
    let sweeper = ReservationSweeper::new(db.clone(), pool, config.sweep_interval())
        .with_offer_locks(coordinator.offer_locks().clone());
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let coordinator = Arc::new(coordinator);
    let app = create_app(AppState::new(db, coordinator));

    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);
    println!();
    println!("  API:       http://{}/api", addr);
    println!("  Health:    http://{}/health", addr);
    println!();

    // Run the server
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
