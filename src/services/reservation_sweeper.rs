//! Reservation sweeper
//! Puts reserved offers whose window has passed back on sale

use crate::services::bot_pool::BotPool;
use crate::services::offer_locks::OfferLocks;
use crate::steam::TradeOffers;
use crate::store::{OfferStore, OfferTx, StoreError};
use crate::types::Offer;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of one pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Offers put back on sale
    pub released: usize,
    /// Expired offers left reserved until the next pass
    pub kept: usize,
}

pub struct ReservationSweeper<S, C> {
    store: Arc<S>,
    pool: Arc<BotPool<C>>,
    locks: OfferLocks,
    interval: Duration,
}

impl<S, C> ReservationSweeper<S, C>
where
    S: OfferStore,
    C: TradeOffers,
{
    pub fn new(store: Arc<S>, pool: Arc<BotPool<C>>, interval: Duration) -> Self {
        Self {
            store,
            pool,
            locks: OfferLocks::new(),
            interval,
        }
    }

    /// Use the coordinator's offer locks so a sweep never races a purchase
    pub fn with_offer_locks(mut self, locks: OfferLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Sweep forever, one pass per interval
    pub async fn run(&self) {
        info!("[Sweeper] Started (interval: {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(report) if report.released + report.kept > 0 => {
                    info!(
                        "[Sweeper] Released {} expired reservations, {} left for the next pass",
                        report.released, report.kept
                    );
                }
                Ok(_) => debug!("[Sweeper] Nothing expired"),
                Err(e) => error!("[Sweeper] Pass failed: {}", e),
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        self.sweep_at(Utc::now()).await
    }

    /// Release every reservation whose deadline is at or before `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let expired = self.store.expired_reservations(now).await?;
        let mut report = SweepReport::default();

        for offer in expired {
            match self.release(&offer, now).await {
                Ok(true) => report.released += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("[Sweeper] Offer {} stays reserved: {}", offer.id, e);
                    report.kept += 1;
                }
            }
        }

        Ok(report)
    }

    /// Ok(false) when the offer changed hands since it was listed
    async fn release(&self, listed: &Offer, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self.locks.lock(listed.id).await;
        let offer = self.store.offer(listed.id).await?;
        if !offer.reservation_expired(now) {
            debug!("[Sweeper] Offer {} no longer expired ({})", offer.id, offer.status);
            return Ok(false);
        }

        if let Some(provider_offer_id) = &offer.provider_offer_id {
            let bot_id = offer.bot_id.as_deref().unwrap_or_default();
            let handle = self
                .pool
                .by_identity(bot_id)
                .ok_or_else(|| anyhow!("bot {:?} is not in the pool", bot_id))?;
            handle.lock().await.decline(provider_offer_id).await?;
        }

        let mut tx = self.store.begin().await?;
        let current = tx.offer_for_update(offer.id).await?;
        if !current.reservation_expired(now) {
            warn!(
                "[Sweeper] Offer {} became {} while provider offer {:?} was declined",
                offer.id, current.status, offer.provider_offer_id
            );
            return Ok(false);
        }
        tx.release_offer(offer.id).await?;
        tx.commit().await?;

        if let Some(bot_id) = &offer.bot_id {
            self.pool.release_load(bot_id);
        }
        info!(
            "[Sweeper] Offer {} back on sale (was reserved on {:?} until {:?})",
            offer.id, offer.bot_id, offer.reserved_until
        );
        Ok(true)
    }
}
