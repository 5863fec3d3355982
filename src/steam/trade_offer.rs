//! Trade offer client
//!
//! Creates, cancels and inspects trade offers on behalf of one logged-in bot.
//! Offers are created through the community web endpoint (form POST, JSON
//! answer that may arrive gzip-compressed); status comes from the web API.

use super::endpoints::{GET_TRADE_OFFER_PATH, NEW_TRADE_OFFER_PATH};
use super::errors::{ProtocolError, TradeError};
use super::guard::sign_payload;
use super::session::{string_or_number, AuthenticatedSession};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, REFERER};
use reqwest::{Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Read;
use tracing::{debug, error, info, warn};

/// Game the bots trade items of
pub const APP_ID: &str = "730";
/// Inventory context of tradable items
pub const CONTEXT_ID: &str = "2";
/// Offset between 32-bit account ids and 64-bit account ids
pub const STEAM_ID64_BASE: u64 = 76_561_197_960_265_728;

/// Counterparty trade URL (`...?partner=<account id>&token=<access token>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeUrl {
    raw: String,
    partner: u64,
    token: String,
}

impl TradeUrl {
    /// Parse and validate; a missing `partner` or `token` is rejected here,
    /// before anything goes on the wire
    pub fn parse(raw: &str) -> Result<Self, TradeError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| TradeError::InvalidTradeUrl(format!("{}: {}", raw, e)))?;

        let mut partner = None;
        let mut token = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "partner" if !value.is_empty() => partner = Some(value.into_owned()),
                "token" if !value.is_empty() => token = Some(value.into_owned()),
                _ => {}
            }
        }

        let partner = partner.ok_or_else(|| TradeError::InvalidTradeUrl("missing partner".into()))?;
        let token = token.ok_or_else(|| TradeError::InvalidTradeUrl("missing token".into()))?;
        let partner = partner
            .parse::<u64>()
            .map_err(|_| TradeError::InvalidTradeUrl(format!("partner {} is not numeric", partner)))?;

        Ok(Self {
            raw: raw.trim().to_string(),
            partner,
            token,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Partner as a 64-bit account id
    pub fn partner_steam_id(&self) -> u64 {
        if self.partner >= STEAM_ID64_BASE {
            self.partner
        } else {
            self.partner + STEAM_ID64_BASE
        }
    }
}

/// Provider trade offer state (`trade_offer_state`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOfferState {
    Invalid,
    Active,
    Accepted,
    Countered,
    Expired,
    Canceled,
    Declined,
    InvalidItems,
    CreatedNeedsConfirmation,
    CanceledBySecondFactor,
    InEscrow,
    Unknown,
}

impl TradeOfferState {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => TradeOfferState::Invalid,
            2 => TradeOfferState::Active,
            3 => TradeOfferState::Accepted,
            4 => TradeOfferState::Countered,
            5 => TradeOfferState::Expired,
            6 => TradeOfferState::Canceled,
            7 => TradeOfferState::Declined,
            8 => TradeOfferState::InvalidItems,
            9 => TradeOfferState::CreatedNeedsConfirmation,
            10 => TradeOfferState::CanceledBySecondFactor,
            11 => TradeOfferState::InEscrow,
            _ => TradeOfferState::Unknown,
        }
    }
}

/// Outcome of a bot-to-counterparty offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentOffer {
    pub provider_offer_id: String,
    pub needs_mobile_confirmation: bool,
    /// Identity-secret signature of the offer id, present when a mobile
    /// confirmation is pending
    pub confirmation_signature: Option<String>,
}

/// Trade operations the coordinator needs from a bot
#[async_trait]
pub trait TradeOffers: Send {
    fn bot_id(&self) -> &str;

    /// Ask the counterparty to hand `asset_id` to the bot; returns the provider offer id
    async fn receive_from_counterparty(
        &mut self,
        asset_id: &str,
        trade_url: &str,
        counterparty_id: &str,
    ) -> Result<String, TradeError>;

    /// Hand `asset_id` from the bot to the counterparty
    async fn send_to_counterparty(&mut self, asset_id: &str, trade_url: &str) -> Result<SentOffer, TradeError>;

    /// Cancel an offer the bot created
    async fn decline(&mut self, provider_offer_id: &str) -> Result<(), TradeError>;

    async fn query_status(&mut self, provider_offer_id: &str) -> Result<TradeOfferState, TradeError>;
}

#[derive(Debug, Default, Deserialize)]
struct CreateOfferResponse {
    #[serde(default, deserialize_with = "string_or_number")]
    tradeofferid: String,
    #[serde(default, rename = "strError")]
    str_error: Option<String>,
    #[serde(default)]
    needs_mobile_confirmation: bool,
    #[serde(default)]
    needs_email_confirmation: bool,
}

#[derive(Debug, Deserialize)]
struct GetOfferEnvelope {
    #[serde(default)]
    response: GetOfferResponse,
}

#[derive(Debug, Default, Deserialize)]
struct GetOfferResponse {
    offer: Option<OfferSummary>,
}

#[derive(Debug, Deserialize)]
struct OfferSummary {
    trade_offer_state: i64,
}

fn asset(asset_id: &str) -> serde_json::Value {
    json!({
        "appid": APP_ID,
        "contextid": CONTEXT_ID,
        "amount": 1,
        "assetid": asset_id,
    })
}

/// `json_tradeoffer` form value; `give` goes in "me", `take` in "them"
fn offer_payload(give: Option<&str>, take: Option<&str>) -> String {
    let me: Vec<_> = give.into_iter().map(asset).collect();
    let them: Vec<_> = take.into_iter().map(asset).collect();
    json!({
        "newversion": true,
        "version": 2,
        "me": { "assets": me, "currency": [], "ready": false },
        "them": { "assets": them, "currency": [], "ready": false },
    })
    .to_string()
}

/// Read the body, decompressing it when the provider gzipped it
async fn read_body(response: Response) -> Result<(StatusCode, Vec<u8>), ProtocolError> {
    let status = response.status();
    let gzipped = response
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    let raw = response.bytes().await?;
    if !gzipped {
        return Ok((status, raw.to_vec()));
    }

    let mut body = Vec::new();
    GzDecoder::new(raw.as_ref())
        .read_to_end(&mut body)
        .map_err(|e| ProtocolError::Malformed(format!("gzip body: {}", e)))?;
    Ok((status, body))
}

fn needs_relogin<T>(result: &Result<T, TradeError>) -> bool {
    matches!(result, Err(TradeError::Protocol(err)) if err.is_unauthorized())
}

/// Trade offer client over one bot's authenticated session
pub struct TradeOfferClient {
    session: AuthenticatedSession,
}

impl TradeOfferClient {
    pub fn new(session: AuthenticatedSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &AuthenticatedSession {
        &self.session
    }

    /// Base64 HMAC-SHA1 of `payload` under the bot's identity secret
    pub fn sign_offer(&self, payload: &[u8]) -> Result<String, TradeError> {
        Ok(sign_payload(&self.session.credentials().identity_secret, payload)?)
    }

    async fn create_offer(
        &self,
        trade_url: &TradeUrl,
        partner: &str,
        give: Option<&str>,
        take: Option<&str>,
    ) -> Result<CreateOfferResponse, TradeError> {
        let create_params = json!({ "trade_offer_access_token": trade_url.token() }).to_string();
        let payload = offer_payload(give, take);

        let response = self
            .session
            .client()
            .post(self.session.settings().endpoints.community_url(NEW_TRADE_OFFER_PATH))
            .header(REFERER, trade_url.as_str())
            .header(ACCEPT_ENCODING, "gzip")
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&[
                ("sessionid", self.session.session_id()),
                ("serverid", "1"),
                ("partner", partner),
                ("tradeoffermessage", ""),
                ("json_tradeoffer", payload.as_str()),
                ("captcha", ""),
                ("trade_offer_create_params", create_params.as_str()),
            ])
            .send()
            .await?;

        let (status, body) = read_body(response).await?;
        if !status.is_success() {
            return Err(ProtocolError::from_response(status, &body).into());
        }

        let decoded: CreateOfferResponse = serde_json::from_slice(&body)
            .map_err(|e| ProtocolError::Malformed(format!("trade offer response: {}", e)))?;

        if let Some(message) = decoded.str_error.as_deref().filter(|m| !m.trim().is_empty()) {
            return Err(ProtocolError::Business(message.to_string()).into());
        }
        if decoded.tradeofferid.is_empty() {
            return Err(ProtocolError::Malformed("trade offer id missing".into()).into());
        }
        Ok(decoded)
    }

    async fn cancel_offer(&self, provider_offer_id: &str) -> Result<(), TradeError> {
        let url = self
            .session
            .settings()
            .endpoints
            .community_url(&format!("/tradeoffer/{}/cancel", provider_offer_id));

        let response = self
            .session
            .client()
            .post(url)
            .form(&[("sessionid", self.session.session_id())])
            .send()
            .await?;

        let (status, body) = read_body(response).await?;
        if !status.is_success() {
            return Err(ProtocolError::from_response(status, &body).into());
        }
        Ok(())
    }

    async fn fetch_state(&self, provider_offer_id: &str) -> Result<TradeOfferState, TradeError> {
        let response = self
            .session
            .client()
            .get(self.session.settings().endpoints.api_url(GET_TRADE_OFFER_PATH))
            .query(&[
                ("tradeofferid", provider_offer_id),
                ("access_token", self.session.access_token()),
            ])
            .send()
            .await?;

        let (status, body) = read_body(response).await?;
        if !status.is_success() {
            return Err(ProtocolError::from_response(status, &body).into());
        }

        let decoded: GetOfferEnvelope = serde_json::from_slice(&body)
            .map_err(|e| ProtocolError::Malformed(format!("trade offer status: {}", e)))?;
        let offer = decoded
            .response
            .offer
            .ok_or_else(|| ProtocolError::Malformed(format!("offer {} not in response", provider_offer_id)))?;
        Ok(TradeOfferState::from_code(offer.trade_offer_state))
    }

    /// Log in again after the provider stopped accepting the session. The
    /// caller still gets the original error.
    async fn relogin(&mut self) {
        warn!("[TradeOffer] {} session rejected, logging in again", self.session.bot_id());
        match self.session.relogin().await {
            Ok(()) => info!("[TradeOffer] {} session renewed", self.session.bot_id()),
            Err(e) => error!(
                "[TradeOffer] {} re-login failed ({}): {}",
                self.session.bot_id(),
                e.reason(),
                e
            ),
        }
    }
}

#[async_trait]
impl TradeOffers for TradeOfferClient {
    fn bot_id(&self) -> &str {
        self.session.bot_id()
    }

    async fn receive_from_counterparty(
        &mut self,
        asset_id: &str,
        trade_url: &str,
        counterparty_id: &str,
    ) -> Result<String, TradeError> {
        let trade_url = TradeUrl::parse(trade_url)?;
        info!(
            "[TradeOffer] {} requesting asset {} from {}",
            self.bot_id(),
            asset_id,
            counterparty_id
        );

        let result = self
            .create_offer(&trade_url, counterparty_id, None, Some(asset_id))
            .await
            .map(|r| r.tradeofferid);
        if needs_relogin(&result) {
            self.relogin().await;
        }

        let provider_offer_id = result?;
        info!("[TradeOffer] {} created incoming offer {}", self.bot_id(), provider_offer_id);
        Ok(provider_offer_id)
    }

    async fn send_to_counterparty(&mut self, asset_id: &str, trade_url: &str) -> Result<SentOffer, TradeError> {
        let trade_url = TradeUrl::parse(trade_url)?;
        let partner = trade_url.partner_steam_id().to_string();
        info!("[TradeOffer] {} sending asset {} to {}", self.bot_id(), asset_id, partner);

        let result = self.create_offer(&trade_url, &partner, Some(asset_id), None).await;
        if needs_relogin(&result) {
            self.relogin().await;
        }
        let created = result?;

        if created.needs_email_confirmation {
            warn!(
                "[TradeOffer] {} offer {} waits for email confirmation",
                self.bot_id(),
                created.tradeofferid
            );
        }

        let confirmation_signature = if created.needs_mobile_confirmation {
            debug!("[TradeOffer] {} offer {} needs mobile confirmation", self.bot_id(), created.tradeofferid);
            Some(self.sign_offer(created.tradeofferid.as_bytes())?)
        } else {
            None
        };

        info!("[TradeOffer] {} created outgoing offer {}", self.bot_id(), created.tradeofferid);
        Ok(SentOffer {
            provider_offer_id: created.tradeofferid,
            needs_mobile_confirmation: created.needs_mobile_confirmation,
            confirmation_signature,
        })
    }

    async fn decline(&mut self, provider_offer_id: &str) -> Result<(), TradeError> {
        let result = self.cancel_offer(provider_offer_id).await;
        if needs_relogin(&result) {
            self.relogin().await;
        }
        result?;
        info!("[TradeOffer] {} canceled offer {}", self.bot_id(), provider_offer_id);
        Ok(())
    }

    async fn query_status(&mut self, provider_offer_id: &str) -> Result<TradeOfferState, TradeError> {
        let result = self.fetch_state(provider_offer_id).await;
        if needs_relogin(&result) {
            self.relogin().await;
        }
        result
    }
}
