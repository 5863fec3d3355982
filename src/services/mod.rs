//! Bot pool, offer coordination and background services

pub mod bot_pool;
pub mod coordinator;
pub mod offer_locks;
pub mod reservation_sweeper;
pub mod retry;

#[cfg(test)]
pub mod testing;

pub use bot_pool::{BotHandle, BotLease, BotLoad, BotPool, NoAvailableBot};
pub use coordinator::{CoordinatorError, OfferCoordinator, PurchaseRequest, ReserveRequest};
pub use offer_locks::OfferLocks;
pub use reservation_sweeper::{ReservationSweeper, SweepReport};
