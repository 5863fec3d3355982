//! Registry of logged-in bots
//!
//! Each bot carries a load counter (offers it currently holds in reservation)
//! and an exclusive lock around its transport. Picking a bot and bumping its
//! load happen under one selection lock, so two concurrent reservations never
//! both see the same bot as the least loaded one. Waiting for the picked bot's
//! transport happens after the selection lock is released.

use crate::steam::{SessionManager, SessionSettings, TradeOfferClient, TradeOffers};
use crate::types::BotCredentials;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The pool holds no bots
#[derive(Debug, Error)]
#[error("no bot available")]
pub struct NoAvailableBot;

/// One bot in the pool
pub struct BotHandle<C> {
    bot_id: String,
    load: AtomicU32,
    client: Arc<Mutex<C>>,
}

impl<C> BotHandle<C> {
    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn load(&self) -> u32 {
        self.load.load(Ordering::SeqCst)
    }

    /// Exclusive access to the bot's transport
    pub async fn lock(&self) -> OwnedMutexGuard<C> {
        self.client.clone().lock_owned().await
    }

    /// One reserved offer left this bot
    pub fn release_one(&self) {
        let _ = self
            .load
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)));
    }
}

/// Bot picked for a reservation: exclusive transport access plus one unit of
/// load. The load is handed back on drop unless the reservation is kept.
pub struct BotLease<C> {
    bot: Arc<BotHandle<C>>,
    guard: OwnedMutexGuard<C>,
    kept: bool,
}

impl<C> BotLease<C> {
    pub fn bot_id(&self) -> &str {
        self.bot.bot_id()
    }

    /// The reservation committed; the bot keeps the load
    pub fn keep(mut self) {
        self.kept = true;
    }
}

impl<C> fmt::Debug for BotLease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotLease")
            .field("bot_id", &self.bot.bot_id)
            .field("kept", &self.kept)
            .finish()
    }
}

impl<C> Deref for BotLease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.guard
    }
}

impl<C> DerefMut for BotLease<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.guard
    }
}

impl<C> Drop for BotLease<C> {
    fn drop(&mut self) {
        if !self.kept {
            self.bot.release_one();
        }
    }
}

/// Bot id and load, as reported by the API
#[derive(Debug, Clone, Serialize)]
pub struct BotLoad {
    pub bot_id: String,
    pub load: u32,
}

/// Authenticated bots keyed by id. Iteration is in bot id order, which is also
/// the tie-break between equally loaded bots.
pub struct BotPool<C> {
    bots: BTreeMap<String, Arc<BotHandle<C>>>,
    selection: Mutex<()>,
}

impl BotPool<TradeOfferClient> {
    /// Log every bot in concurrently. Bots that fail are left out and logged.
    pub async fn initialize(credentials: Vec<BotCredentials>, settings: SessionSettings) -> Self {
        let total = credentials.len();
        let mut logins = JoinSet::new();

        for creds in credentials {
            let settings = settings.clone();
            logins.spawn(async move {
                let bot_id = creds.bot_id.clone();
                let result = match SessionManager::new(creds, settings) {
                    Ok(manager) => manager.login().await,
                    Err(e) => Err(e),
                };
                (bot_id, result)
            });
        }

        let mut clients = Vec::with_capacity(total);
        while let Some(joined) = logins.join_next().await {
            match joined {
                Ok((bot_id, Ok(session))) => {
                    debug!("[BotPool] {} ready", bot_id);
                    clients.push(TradeOfferClient::new(session));
                }
                Ok((bot_id, Err(e))) => {
                    warn!("[BotPool] {} left out: login failed ({}): {}", bot_id, e.reason(), e);
                }
                Err(e) => error!("[BotPool] Login task aborted: {}", e),
            }
        }

        info!("[BotPool] {}/{} bots logged in", clients.len(), total);
        Self::from_clients(clients)
    }
}

impl<C: TradeOffers> BotPool<C> {
    pub fn from_clients(clients: Vec<C>) -> Self {
        let mut bots = BTreeMap::new();
        for client in clients {
            let bot_id = client.bot_id().to_string();
            let handle = Arc::new(BotHandle {
                bot_id: bot_id.clone(),
                load: AtomicU32::new(0),
                client: Arc::new(Mutex::new(client)),
            });
            if bots.insert(bot_id.clone(), handle).is_some() {
                warn!("[BotPool] Duplicate bot {}, keeping the last one", bot_id);
            }
        }
        Self {
            bots,
            selection: Mutex::new(()),
        }
    }
}

impl<C> BotPool<C> {
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    /// Exact-match lookup
    pub fn by_identity(&self, bot_id: &str) -> Option<Arc<BotHandle<C>>> {
        self.bots.get(bot_id).cloned()
    }

    /// Set loads from persisted reservations (startup)
    pub fn seed_loads(&self, counts: &HashMap<String, u32>) {
        for (bot_id, handle) in &self.bots {
            handle
                .load
                .store(counts.get(bot_id).copied().unwrap_or(0), Ordering::SeqCst);
        }
    }

    /// One reserved offer left `bot_id`
    pub fn release_load(&self, bot_id: &str) {
        if let Some(handle) = self.bots.get(bot_id) {
            handle.release_one();
        }
    }

    pub fn snapshot(&self) -> Vec<BotLoad> {
        self.bots
            .values()
            .map(|bot| BotLoad {
                bot_id: bot.bot_id.clone(),
                load: bot.load(),
            })
            .collect()
    }

    /// Pick the least loaded bot and count the new reservation against it.
    ///
    /// Ties go to the first bot in id order. A busy bot is still picked when
    /// it is the least loaded; the caller then waits for its transport.
    pub async fn pick_least_loaded(&self) -> Result<BotLease<C>, NoAvailableBot> {
        let bot = {
            let _selection = self.selection.lock().await;
            let bot = self
                .bots
                .values()
                .fold(None::<&Arc<BotHandle<C>>>, |best, bot| match best {
                    Some(best) if best.load() <= bot.load() => Some(best),
                    _ => Some(bot),
                })
                .ok_or(NoAvailableBot)?
                .clone();
            bot.load.fetch_add(1, Ordering::SeqCst);
            bot
        };

        debug!("[BotPool] Picked {} (load {})", bot.bot_id, bot.load());
        let guard = bot.client.clone().lock_owned().await;
        Ok(BotLease {
            bot,
            guard,
            kept: false,
        })
    }
}
