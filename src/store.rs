//! Persistence interfaces the coordinator and sweeper work against
//!
//! Reads on `OfferStore` never lock. Everything that changes offer state goes
//! through an `OfferTx`, opened only once the provider outcome is known. Its
//! `offer_for_update` read locks the row until the transaction commits or is
//! dropped. Dropping an uncommitted transaction rolls it back.

use crate::types::{NewOffer, Offer, OfferStatus, TransactionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait OfferStore: Send + Sync + 'static {
    type Tx: OfferTx;

    /// Open a transaction
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Trade URL of a registered user
    async fn user_trade_url(&self, steam_id: &str) -> Result<String, StoreError>;

    async fn offer(&self, offer_id: Uuid) -> Result<Offer, StoreError>;

    async fn offer_by_provider_id(&self, provider_offer_id: &str) -> Result<Offer, StoreError>;

    /// Reserved offers whose deadline is at or before `now`
    async fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Offer>, StoreError>;

    /// Number of reserved offers per bot
    async fn reserved_counts(&self) -> Result<HashMap<String, u32>, StoreError>;
}

#[async_trait]
pub trait OfferTx: Send {
    /// Insert a new on-sale offer row; returns its id
    async fn create_offer_row(&mut self, offer: &NewOffer) -> Result<Uuid, StoreError>;

    /// Locking read by offer id
    async fn offer_for_update(&mut self, offer_id: Uuid) -> Result<Offer, StoreError>;

    /// Record the incoming trade offer and open the reservation window
    async fn update_offer_after_receive(
        &mut self,
        offer_id: Uuid,
        bot_id: &str,
        provider_offer_id: &str,
        reserved_until: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn change_offer_status(&mut self, offer_id: Uuid, status: OfferStatus) -> Result<(), StoreError>;

    /// Put a reserved offer back on sale, clearing bot, provider id and deadline
    async fn release_offer(&mut self, offer_id: Uuid) -> Result<(), StoreError>;

    async fn create_transaction_record(&mut self, record: &TransactionRecord) -> Result<Uuid, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}
