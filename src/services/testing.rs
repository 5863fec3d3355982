//! Scripted in-process trader used by the pool, coordinator and sweeper tests

use crate::db::Database;
use crate::steam::{ProtocolError, SentOffer, TradeError, TradeOfferState, TradeOffers, TradeUrl};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Barrier;

/// Provider offer ids are unique across every fake bot in the process
static NEXT_OFFER_ID: AtomicU64 = AtomicU64::new(1000);

fn next_offer_id() -> String {
    NEXT_OFFER_ID.fetch_add(1, Ordering::SeqCst).to_string()
}

/// File-backed database with a multi-connection pool; keep the `TempDir` alive
pub async fn file_database() -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offers.db");
    let db = Database::new(path.to_str().unwrap()).await.unwrap();
    (db, dir)
}

/// Shared view of what a `FakeTrader` was asked to do
#[derive(Default)]
pub struct FakeState {
    pub calls: Mutex<Vec<String>>,
    pub in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
    pub fail_receive: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_decline: AtomicBool,
    pub delay_ms: AtomicU64,
    /// Every call waits here before returning
    pub barrier: Mutex<Option<Arc<Barrier>>>,
}

impl FakeState {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_barrier(&self, barrier: Arc<Barrier>) {
        *self.barrier.lock().unwrap() = Some(barrier);
    }

    async fn enter(&self, call: String) {
        self.calls.lock().unwrap().push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let barrier = self.barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn scripted_failure(flag: &AtomicBool) -> Result<(), TradeError> {
        if flag.load(Ordering::SeqCst) {
            return Err(ProtocolError::Business("scripted failure".into()).into());
        }
        Ok(())
    }
}

pub struct FakeTrader {
    bot_id: String,
    state: Arc<FakeState>,
}

impl FakeTrader {
    pub fn new(bot_id: &str) -> (Self, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        (
            Self {
                bot_id: bot_id.to_string(),
                state: state.clone(),
            },
            state,
        )
    }
}

#[async_trait]
impl TradeOffers for FakeTrader {
    fn bot_id(&self) -> &str {
        &self.bot_id
    }

    async fn receive_from_counterparty(
        &mut self,
        asset_id: &str,
        trade_url: &str,
        counterparty_id: &str,
    ) -> Result<String, TradeError> {
        TradeUrl::parse(trade_url)?;
        self.state
            .enter(format!("receive:{}:{}", asset_id, counterparty_id))
            .await;
        let result = FakeState::scripted_failure(&self.state.fail_receive)
            .map(|_| next_offer_id());
        self.state.exit();
        result
    }

    async fn send_to_counterparty(&mut self, asset_id: &str, trade_url: &str) -> Result<SentOffer, TradeError> {
        TradeUrl::parse(trade_url)?;
        self.state.enter(format!("send:{}", asset_id)).await;
        let result = FakeState::scripted_failure(&self.state.fail_send).map(|_| SentOffer {
            provider_offer_id: next_offer_id(),
            needs_mobile_confirmation: false,
            confirmation_signature: None,
        });
        self.state.exit();
        result
    }

    async fn decline(&mut self, provider_offer_id: &str) -> Result<(), TradeError> {
        self.state.enter(format!("decline:{}", provider_offer_id)).await;
        let result = FakeState::scripted_failure(&self.state.fail_decline);
        self.state.exit();
        result
    }

    async fn query_status(&mut self, provider_offer_id: &str) -> Result<TradeOfferState, TradeError> {
        self.state.enter(format!("status:{}", provider_offer_id)).await;
        self.state.exit();
        Ok(TradeOfferState::Active)
    }
}
