//! Offer reservation coordinator
//!
//! Drives an offer through the transitions that involve a provider call:
//!
//! - reserve:  OnSale -> Reserved  (bot asks the seller for the item)
//! - purchase: Reserved -> Sold    (bot hands the item to the buyer)
//! - cancel:   Reserved -> Canceled (bot cancels its incoming offer)
//!
//! A transition holds the offer's lock across the provider call, then writes
//! the outcome in one short store transaction that re-checks the status. A
//! failed call writes nothing.
//!
//! Lock order: offer lock, then the bot's transport lock, then the store
//! transaction. A store transaction never waits on either lock.

use crate::services::bot_pool::{BotPool, NoAvailableBot};
use crate::services::offer_locks::OfferLocks;
use crate::steam::{TradeError, TradeOfferState, TradeOffers, TradeUrl};
use crate::store::{OfferStore, OfferTx, StoreError};
use crate::types::{NewOffer, OfferStatus, TransactionRecord, TransactionStatus};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    NoAvailableBot(#[from] NoAvailableBot),
    /// Assigned bot is not in the pool (e.g. it failed to log in after a restart)
    #[error("bot {0} is not in the pool")]
    BotNotFound(String),
    #[error("offer {offer_id} is {from}, cannot become {to}")]
    InvalidTransition {
        offer_id: Uuid,
        from: OfferStatus,
        to: OfferStatus,
    },
    #[error("reservation of offer {0} has expired")]
    ReservationExpired(Uuid),
    #[error(transparent)]
    Trade(#[from] TradeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What to reserve: a new listing or an existing on-sale offer
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReserveRequest {
    Existing { offer_id: Uuid },
    New(NewOffer),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseRequest {
    pub offer_id: Uuid,
    pub buyer_id: String,
}

pub struct OfferCoordinator<S, C> {
    store: Arc<S>,
    pool: Arc<BotPool<C>>,
    locks: OfferLocks,
    reservation_window: Duration,
}

impl<S, C> OfferCoordinator<S, C>
where
    S: OfferStore,
    C: TradeOffers,
{
    pub fn new(store: Arc<S>, pool: Arc<BotPool<C>>, reservation_window: Duration) -> Self {
        Self {
            store,
            pool,
            locks: OfferLocks::new(),
            reservation_window,
        }
    }

    /// Share offer locks with another component that moves offers (the sweeper)
    pub fn with_offer_locks(mut self, locks: OfferLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn pool(&self) -> &Arc<BotPool<C>> {
        &self.pool
    }

    pub fn offer_locks(&self) -> &OfferLocks {
        &self.locks
    }

    fn check_transition(offer_id: Uuid, from: OfferStatus, to: OfferStatus) -> Result<(), CoordinatorError> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoordinatorError::InvalidTransition { offer_id, from, to })
        }
    }

    /// OnSale -> Reserved. Returns the offer id.
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Uuid, CoordinatorError> {
        // A new listing has no row yet, so nobody else can reach it
        let (_guard, seller_id, asset_id) = match &request {
            ReserveRequest::Existing { offer_id } => {
                let guard = self.locks.lock(*offer_id).await;
                let offer = self.store.offer(*offer_id).await?;
                Self::check_transition(offer.id, offer.status, OfferStatus::Reserved)?;
                (Some(guard), offer.seller_id, offer.asset_id)
            }
            ReserveRequest::New(listing) => (None, listing.seller_id.clone(), listing.asset_id.clone()),
        };

        // A bad trade URL fails here, before a bot is taken
        let trade_url = self.store.user_trade_url(&seller_id).await?;
        TradeUrl::parse(&trade_url)?;

        if self.pool.is_empty() {
            return Err(NoAvailableBot.into());
        }

        let mut bot = self.pool.pick_least_loaded().await?;
        let bot_id = bot.bot_id().to_string();
        info!("[Coordinator] Reserving asset {} of {} on {}", asset_id, seller_id, bot_id);

        let provider_offer_id = bot
            .receive_from_counterparty(&asset_id, &trade_url, &seller_id)
            .await?;

        let reserved_until = Utc::now() + self.reservation_window;
        let offer_id = match self
            .record_reservation(&request, &bot_id, &provider_offer_id, reserved_until)
            .await
        {
            Ok(offer_id) => offer_id,
            Err(e) => {
                error!(
                    "[Coordinator] Reservation of asset {} not recorded after {} created provider offer {}: {}",
                    asset_id, bot_id, provider_offer_id, e
                );
                return Err(e);
            }
        };

        bot.keep();
        info!(
            "[Coordinator] Offer {} reserved on {} until {} (provider offer {})",
            offer_id, bot_id, reserved_until, provider_offer_id
        );
        Ok(offer_id)
    }

    async fn record_reservation(
        &self,
        request: &ReserveRequest,
        bot_id: &str,
        provider_offer_id: &str,
        reserved_until: DateTime<Utc>,
    ) -> Result<Uuid, CoordinatorError> {
        let mut tx = self.store.begin().await?;
        let offer_id = match request {
            ReserveRequest::Existing { offer_id } => {
                let offer = tx.offer_for_update(*offer_id).await?;
                Self::check_transition(offer.id, offer.status, OfferStatus::Reserved)?;
                offer.id
            }
            ReserveRequest::New(listing) => tx.create_offer_row(listing).await?,
        };
        tx.update_offer_after_receive(offer_id, bot_id, provider_offer_id, reserved_until)
            .await?;
        tx.commit().await?;
        Ok(offer_id)
    }

    /// Reserved -> Sold. The item is handed over first, then the purchase is recorded.
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<(), CoordinatorError> {
        let buyer_url = self.store.user_trade_url(&request.buyer_id).await?;
        TradeUrl::parse(&buyer_url)?;

        let _guard = self.locks.lock(request.offer_id).await;
        let offer = self.store.offer(request.offer_id).await?;
        Self::check_transition(offer.id, offer.status, OfferStatus::Sold)?;
        if offer.reservation_expired(Utc::now()) {
            return Err(CoordinatorError::ReservationExpired(offer.id));
        }

        let bot_id = offer
            .bot_id
            .clone()
            .ok_or_else(|| StoreError::Corrupt(format!("reserved offer {} has no bot", offer.id)))?;
        let handle = self
            .pool
            .by_identity(&bot_id)
            .ok_or_else(|| CoordinatorError::BotNotFound(bot_id.clone()))?;

        let mut bot = handle.lock().await;
        let sent = bot.send_to_counterparty(&offer.asset_id, &buyer_url).await?;

        let record = TransactionRecord {
            offer_id: offer.id,
            seller_id: offer.seller_id.clone(),
            buyer_id: request.buyer_id.clone(),
            bot_id: bot_id.clone(),
            provider_offer_id: Some(sent.provider_offer_id.clone()),
            price: offer.price,
            status: TransactionStatus::Completed,
        };
        let committed = async {
            let mut tx = self.store.begin().await?;
            let current = tx.offer_for_update(offer.id).await?;
            Self::check_transition(current.id, current.status, OfferStatus::Sold)?;
            tx.create_transaction_record(&record).await?;
            tx.change_offer_status(offer.id, OfferStatus::Sold).await?;
            tx.commit().await?;
            Ok::<_, CoordinatorError>(())
        }
        .await;

        if let Err(e) = committed {
            error!(
                "[Coordinator] Offer {} not marked sold after {} sent provider offer {}: {}",
                offer.id, bot_id, sent.provider_offer_id, e
            );
            return Err(e);
        }

        handle.release_one();
        info!(
            "[Coordinator] Offer {} sold to {} via {} (provider offer {})",
            offer.id, request.buyer_id, bot_id, sent.provider_offer_id
        );
        Ok(())
    }

    /// Reserved -> Canceled, keyed by the incoming provider offer
    pub async fn cancel(&self, provider_offer_id: &str) -> Result<(), CoordinatorError> {
        let found = self.store.offer_by_provider_id(provider_offer_id).await?;
        let _guard = self.locks.lock(found.id).await;

        // Released by the sweeper while we waited
        let offer = self.store.offer(found.id).await?;
        if offer.provider_offer_id.as_deref() != Some(provider_offer_id) {
            return Err(StoreError::NotFound(format!("trade offer {}", provider_offer_id)).into());
        }
        Self::check_transition(offer.id, offer.status, OfferStatus::Canceled)?;

        let bot_id = offer
            .bot_id
            .clone()
            .ok_or_else(|| StoreError::Corrupt(format!("reserved offer {} has no bot", offer.id)))?;
        let handle = self
            .pool
            .by_identity(&bot_id)
            .ok_or_else(|| CoordinatorError::BotNotFound(bot_id.clone()))?;

        let mut bot = handle.lock().await;
        bot.decline(provider_offer_id).await?;

        let committed = async {
            let mut tx = self.store.begin().await?;
            let current = tx.offer_for_update(offer.id).await?;
            Self::check_transition(current.id, current.status, OfferStatus::Canceled)?;
            tx.change_offer_status(offer.id, OfferStatus::Canceled).await?;
            tx.commit().await?;
            Ok::<_, CoordinatorError>(())
        }
        .await;

        if let Err(e) = committed {
            warn!(
                "[Coordinator] Offer {} still reserved after {} canceled provider offer {}: {}",
                offer.id, bot_id, provider_offer_id, e
            );
            return Err(e);
        }

        handle.release_one();
        info!("[Coordinator] Offer {} canceled (provider offer {})", offer.id, provider_offer_id);
        Ok(())
    }

    /// Provider-side state of an offer; no local transition
    pub async fn status(&self, provider_offer_id: &str) -> Result<TradeOfferState, CoordinatorError> {
        let offer = self.store.offer_by_provider_id(provider_offer_id).await?;
        let bot_id = offer
            .bot_id
            .ok_or_else(|| StoreError::NotFound(format!("bot of trade offer {}", provider_offer_id)))?;
        let handle = self
            .pool
            .by_identity(&bot_id)
            .ok_or(CoordinatorError::BotNotFound(bot_id))?;

        let mut bot = handle.lock().await;
        Ok(bot.query_status(provider_offer_id).await?)
    }
}
