//! Per-offer locks
//!
//! A transition on one offer holds that offer's lock across its provider call.
//! Transitions on different offers never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Held while an offer is being moved between states
pub type OfferGuard = OwnedMutexGuard<()>;

/// Keyed lock registry shared by the coordinator and the sweeper
#[derive(Clone, Default)]
pub struct OfferLocks {
    locks: Arc<Mutex<HashMap<Uuid, Weak<Mutex<()>>>>>,
}

impl OfferLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `offer_id`
    pub async fn lock(&self, offer_id: Uuid) -> OfferGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries nobody holds or waits on
            locks.retain(|_, lock| lock.strong_count() > 0);

            match locks.get(&offer_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(offer_id, Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Offers currently locked or waited on
    pub async fn active(&self) -> usize {
        self.locks
            .lock()
            .await
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}
