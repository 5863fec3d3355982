//! Skin Marketplace Bot Library
//!
//! Bot accounts that hold items in escrow between sellers and buyers:
//!
//! 1. **Sessions**: each bot logs in to the provider (RSA password handshake,
//!    guard code, token poll) and keeps its own cookie jar.
//!
//! 2. **Trade offers**: bots ask sellers for items and hand them to buyers.
//!
//! 3. **Reservations**: an offer is bound to the least loaded bot while a buyer
//!    completes the purchase; expired reservations are swept back on sale.

pub mod api;
pub mod config;
pub mod db;
pub mod services;
pub mod steam;
pub mod store;
pub mod types;
pub mod vault;

pub use config::Config;
pub use db::Database;
pub use services::{BotPool, OfferCoordinator, ReservationSweeper};
pub use steam::{SessionManager, TradeOfferClient};
