//! Provider protocol: guard codes, login sessions and trade offers

pub mod endpoints;
pub mod errors;
pub mod guard;
pub mod session;
pub mod trade_offer;

pub use endpoints::{ProviderEndpoints, SessionSettings};
pub use errors::{AuthError, CodeGenerationError, ProtocolError, TradeError};
pub use guard::{generate_guard_code, guard_code_at, sign_payload, ServerClock};
pub use session::{AuthenticatedSession, ProviderClock, SessionManager, SessionTokens};
pub use trade_offer::{SentOffer, TradeOfferClient, TradeOfferState, TradeOffers, TradeUrl};
