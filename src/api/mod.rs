//! Web API module for the marketplace bots
//!
//! Thin REST surface over the offer coordinator and the user/bot registries.

pub mod routes;
pub mod server;

pub use server::{create_app, AppState};
