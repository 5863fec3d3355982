//! Provider protocol error types
//!
//! Splits failures into the categories the rest of the bot reacts to:
//! guard-code generation, login, and trade-offer protocol errors.

use reqwest::StatusCode;
use thiserror::Error;

/// Guard code could not be produced (bad shared secret or no provider time)
#[derive(Debug, Error)]
pub enum CodeGenerationError {
    #[error("shared secret is not valid base64: {0}")]
    InvalidSecret(String),
    #[error("provider time source unavailable: {0}")]
    TimeSource(String),
}

/// Login attempt failure. Terminal for that attempt; the bot is left out of the pool.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("handshake parameters unavailable: {0}")]
    Handshake(String),
    #[error("credentials rejected: {0}")]
    CredentialsRejected(String),
    #[error("guard code rejected with HTTP {0}")]
    GuardCodeRejected(StatusCode),
    #[error("no access token after {attempts} poll attempts")]
    PollTimeout { attempts: u32 },
    #[error(transparent)]
    CodeGeneration(#[from] CodeGenerationError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    #[error("invalid session settings: {0}")]
    InvalidSettings(String),
}

impl AuthError {
    /// Stable machine-readable reason, used in logs and CLI output
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Handshake(_) => "handshake_failed",
            AuthError::CredentialsRejected(_) => "credentials_rejected",
            AuthError::GuardCodeRejected(_) => "guard_code_rejected",
            AuthError::PollTimeout { .. } => "poll_timeout",
            AuthError::CodeGeneration(_) => "code_generation",
            AuthError::Network(_) => "network",
            AuthError::MalformedResponse(_) => "malformed_response",
            AuthError::InvalidSettings(_) => "invalid_settings",
        }
    }

    /// Transport failures are the only ones worth another poll attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Network(_))
    }
}

/// Non-success answer from the provider, including business errors inside a 200 body
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("provider rejected the request: {0}")]
    Business(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ProtocolError {
    /// Parse a non-2xx response, keeping the provider's own message when it sent one
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| {
                v.get("strError")
                    .or_else(|| v.get("error"))
                    .and_then(|e| e.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| text.chars().take(200).collect());

        ProtocolError::Status {
            status,
            body: message,
        }
    }

    /// Session cookies or access token no longer accepted
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ProtocolError::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

/// Errors surfaced by the trade-offer client
#[derive(Debug, Error)]
pub enum TradeError {
    /// Counterparty trade URL lacks `partner` or `token`; raised before any request
    #[error("invalid trade URL: {0}")]
    InvalidTradeUrl(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("identity secret unusable: {0}")]
    Signing(#[from] CodeGenerationError),
}

impl From<reqwest::Error> for TradeError {
    fn from(err: reqwest::Error) -> Self {
        TradeError::Protocol(ProtocolError::Transport(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_keeps_provider_message() {
        let err = ProtocolError::from_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"strError":"There was an error sending your trade offer. (26)"}"#,
        );
        match err {
            ProtocolError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(body.contains("(26)"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_status_error_falls_back_to_body() {
        let err = ProtocolError::from_response(StatusCode::BAD_GATEWAY, b"<html>down</html>");
        assert!(err.to_string().contains("<html>down</html>"));
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_unauthorized_detection() {
        let err = ProtocolError::from_response(StatusCode::UNAUTHORIZED, b"");
        assert!(err.is_unauthorized());
        let err = ProtocolError::from_response(StatusCode::FORBIDDEN, b"");
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_auth_reasons() {
        assert_eq!(
            AuthError::CredentialsRejected("x".into()).reason(),
            "credentials_rejected"
        );
        assert_eq!(
            AuthError::GuardCodeRejected(StatusCode::BAD_REQUEST).reason(),
            "guard_code_rejected"
        );
        assert_eq!(AuthError::PollTimeout { attempts: 2 }.reason(), "poll_timeout");
        assert!(!AuthError::PollTimeout { attempts: 2 }.is_retryable());
    }
}
