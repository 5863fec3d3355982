//! Core types for the trading bots

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stored login material for one bot account
#[derive(Clone, Serialize, Deserialize)]
pub struct BotCredentials {
    /// Stable bot identifier (the account's 64-bit id)
    pub bot_id: String,
    pub account_name: String,
    pub password: String,
    /// Base64 secret behind the guard codes
    pub shared_secret: String,
    /// Base64 secret used to sign confirmations
    pub identity_secret: String,
    pub device_id: String,
}

impl BotCredentials {
    /// Device ids are always stored in the `android:` form
    pub fn normalize_device_id(device_id: &str) -> String {
        let device_id = device_id.trim();
        if device_id.is_empty() || device_id.starts_with("android:") {
            device_id.to_string()
        } else {
            format!("android:{}", device_id)
        }
    }
}

// Keep secrets out of logs
impl fmt::Debug for BotCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotCredentials")
            .field("bot_id", &self.bot_id)
            .field("account_name", &self.account_name)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Marketplace user (seller or buyer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub steam_id: String,
    pub username: String,
    pub trade_url: String,
}

/// Offer lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    OnSale,
    Reserved,
    Sold,
    Canceled,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::OnSale => "onsale",
            OfferStatus::Reserved => "reserved",
            OfferStatus::Sold => "sold",
            OfferStatus::Canceled => "canceled",
        }
    }

    /// Forward transitions driven by a bot call. Reserved -> Reserved is not one of them.
    pub fn can_transition_to(&self, next: OfferStatus) -> bool {
        matches!(
            (self, next),
            (OfferStatus::OnSale, OfferStatus::Reserved)
                | (OfferStatus::Reserved, OfferStatus::Sold)
                | (OfferStatus::Reserved, OfferStatus::Canceled)
        )
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onsale" => Ok(OfferStatus::OnSale),
            "reserved" => Ok(OfferStatus::Reserved),
            "sold" => Ok(OfferStatus::Sold),
            "canceled" => Ok(OfferStatus::Canceled),
            other => Err(format!("unknown offer status: {}", other)),
        }
    }
}

/// Item listed for sale, as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub seller_id: String,
    /// Bot holding (or about to hold) the item
    pub bot_id: Option<String>,
    /// Provider trade offer that moved the item to the bot
    pub provider_offer_id: Option<String>,
    pub asset_id: String,
    pub class_id: String,
    pub instance_id: String,
    pub market_name: String,
    pub price: Decimal,
    pub status: OfferStatus,
    pub reserved_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Reserved offer whose window has closed
    pub fn reservation_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferStatus::Reserved
            && self.reserved_until.map(|until| until <= now).unwrap_or(true)
    }
}

/// Listing data for a new offer row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOffer {
    pub seller_id: String,
    pub asset_id: String,
    #[serde(default)]
    pub class_id: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub market_name: String,
    pub price: Decimal,
}

/// Outcome recorded for a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Purchase record written when the bot has handed the item to the buyer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub offer_id: Uuid,
    pub seller_id: String,
    pub buyer_id: String,
    pub bot_id: String,
    /// Provider trade offer that moved the item to the buyer
    pub provider_offer_id: Option<String>,
    pub price: Decimal,
    pub status: TransactionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn offer(status: OfferStatus, reserved_until: Option<DateTime<Utc>>) -> Offer {
        let now = Utc::now();
        Offer {
            id: Uuid::new_v4(),
            seller_id: "76561198000000001".into(),
            bot_id: Some("bot-a".into()),
            provider_offer_id: Some("555".into()),
            asset_id: "31337".into(),
            class_id: String::new(),
            instance_id: String::new(),
            market_name: "AK-47 | Redline".into(),
            price: dec!(12.50),
            status,
            reserved_until,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_transitions() {
        use OfferStatus::*;
        assert!(OnSale.can_transition_to(Reserved));
        assert!(Reserved.can_transition_to(Sold));
        assert!(Reserved.can_transition_to(Canceled));
        assert!(!Reserved.can_transition_to(Reserved));
        assert!(!OnSale.can_transition_to(Sold));
        assert!(!Sold.can_transition_to(Canceled));
        assert!(!Canceled.can_transition_to(Reserved));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [OfferStatus::OnSale, OfferStatus::Reserved, OfferStatus::Sold, OfferStatus::Canceled] {
            assert_eq!(status.as_str().parse::<OfferStatus>().unwrap(), status);
        }
        assert!("pending".parse::<OfferStatus>().is_err());
    }

    #[test]
    fn test_reservation_expiry() {
        let now = Utc::now();
        assert!(!offer(OfferStatus::Reserved, Some(now + Duration::minutes(15))).reservation_expired(now));
        assert!(offer(OfferStatus::Reserved, Some(now - Duration::seconds(1))).reservation_expired(now));
        assert!(!offer(OfferStatus::Sold, Some(now - Duration::seconds(1))).reservation_expired(now));
    }

    #[test]
    fn test_device_id_normalization() {
        assert_eq!(BotCredentials::normalize_device_id("abc"), "android:abc");
        assert_eq!(BotCredentials::normalize_device_id("android:abc"), "android:abc");
        assert_eq!(BotCredentials::normalize_device_id(""), "");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let creds = BotCredentials {
            bot_id: "1".into(),
            account_name: "bot".into(),
            password: "hunter2".into(),
            shared_secret: "c2VjcmV0".into(),
            identity_secret: "aWRlbnRpdHk=".into(),
            device_id: String::new(),
        };
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("c2VjcmV0"));
    }
}
