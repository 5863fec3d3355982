//! Guard code generation
//!
//! The provider's second factor is a 5-character code derived from the bot's
//! shared secret and the provider's own clock:
//!
//! - bucket = floor(server_unix_time / 30), as 8 big-endian bytes
//! - HMAC-SHA1(secret, bucket), dynamic truncation to a 31-bit integer
//! - 5 symbols from a 26-character alphabet, least significant first
//!
//! The clock must be the provider's, not local wall time, or codes drift out of
//! the accepted window.

use super::errors::CodeGenerationError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Symbols used by guard codes (no 0/1/A/E/I/L/O/S/U/Z)
const CODE_ALPHABET: &[u8; 26] = b"23456789BCDFGHJKMNPQRTVWXY";

/// Length of a guard code
pub const CODE_LENGTH: usize = 5;

/// Width of one code window in seconds
pub const TIME_STEP_SECS: i64 = 30;

/// Source of the provider's current unix time
#[async_trait]
pub trait ServerClock: Send + Sync {
    async fn server_time(&self) -> Result<i64, CodeGenerationError>;
}

/// Time bucket a unix timestamp falls into
pub fn time_bucket(unix_time: i64) -> u64 {
    unix_time.div_euclid(TIME_STEP_SECS).max(0) as u64
}

/// Decode a provider secret, tolerating stray whitespace and missing `=` padding
pub fn decode_secret(secret: &str) -> Result<Vec<u8>, CodeGenerationError> {
    let mut normalized = secret.trim().to_string();
    if normalized.is_empty() {
        return Err(CodeGenerationError::InvalidSecret("secret is empty".into()));
    }
    let rem = normalized.len() % 4;
    if rem != 0 {
        normalized.push_str(&"=".repeat(4 - rem));
    }

    STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| CodeGenerationError::InvalidSecret(e.to_string()))
}

/// HMAC-SHA1 of `message` keyed with a decoded provider secret
pub(crate) fn hmac_sha1(key: &[u8], message: &[u8]) -> Result<[u8; 20], CodeGenerationError> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| CodeGenerationError::InvalidSecret(e.to_string()))?;
    mac.update(message);
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Ok(digest)
}

/// Guard code for an explicit time bucket
pub fn guard_code_for_bucket(shared_secret: &str, bucket: u64) -> Result<String, CodeGenerationError> {
    let key = decode_secret(shared_secret)?;
    let digest = hmac_sha1(&key, &bucket.to_be_bytes())?;

    let offset = (digest[19] & 0x0F) as usize;
    let mut full = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7FFF_FFFF;

    let radix = CODE_ALPHABET.len() as u32;
    let mut code = String::with_capacity(CODE_LENGTH);
    for _ in 0..CODE_LENGTH {
        code.push(CODE_ALPHABET[(full % radix) as usize] as char);
        full /= radix;
    }
    Ok(code)
}

/// Guard code valid at the given provider unix time
pub fn guard_code_at(shared_secret: &str, server_unix_time: i64) -> Result<String, CodeGenerationError> {
    guard_code_for_bucket(shared_secret, time_bucket(server_unix_time))
}

/// Guard code for "now" as reported by the provider clock
pub async fn generate_guard_code<C>(shared_secret: &str, clock: &C) -> Result<String, CodeGenerationError>
where
    C: ServerClock + ?Sized,
{
    // Validate the secret before spending a request on the clock
    decode_secret(shared_secret)?;
    let now = clock.server_time().await?;
    guard_code_at(shared_secret, now)
}

/// Base64 HMAC-SHA1 signature of `payload` under the identity secret
pub fn sign_payload(identity_secret: &str, payload: &[u8]) -> Result<String, CodeGenerationError> {
    let key = decode_secret(identity_secret)?;
    let digest = hmac_sha1(&key, payload)?;
    Ok(STANDARD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "JBSWY3DPEHPK3PXP";

    struct FixedClock(i64);

    #[async_trait]
    impl ServerClock for FixedClock {
        async fn server_time(&self) -> Result<i64, CodeGenerationError> {
            Ok(self.0)
        }
    }

    struct DownClock;

    #[async_trait]
    impl ServerClock for DownClock {
        async fn server_time(&self) -> Result<i64, CodeGenerationError> {
            Err(CodeGenerationError::TimeSource("connection refused".into()))
        }
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(guard_code_for_bucket(SECRET, 56_230_000).unwrap(), "M73JC");
        assert_eq!(guard_code_for_bucket(SECRET, 56_230_001).unwrap(), "Q8B98");
        assert_eq!(guard_code_for_bucket(SECRET, 0).unwrap(), "PBKFK");
    }

    #[test]
    fn test_same_bucket_is_deterministic() {
        let first = guard_code_for_bucket(SECRET, 56_230_000).unwrap();
        for _ in 0..10 {
            assert_eq!(guard_code_for_bucket(SECRET, 56_230_000).unwrap(), first);
        }
        // Every second of the window maps to the same code
        let start = 56_230_000_i64 * TIME_STEP_SECS;
        for t in start..start + TIME_STEP_SECS {
            assert_eq!(guard_code_at(SECRET, t).unwrap(), first);
        }
        assert_ne!(guard_code_at(SECRET, start + TIME_STEP_SECS).unwrap(), first);
    }

    #[test]
    fn test_code_shape() {
        let code = guard_code_for_bucket(SECRET, 1_234_567).unwrap();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_missing_padding_is_normalized() {
        let padded = "AQIDBAUGBwgJCgsMDQ4PEBESExQ=";
        let bare = "AQIDBAUGBwgJCgsMDQ4PEBESExQ";
        assert_eq!(decode_secret(padded).unwrap(), (1u8..=20).collect::<Vec<_>>());
        assert_eq!(
            guard_code_for_bucket(bare, 56_230_000).unwrap(),
            guard_code_for_bucket(padded, 56_230_000).unwrap()
        );
        assert_eq!(guard_code_for_bucket(bare, 56_230_000).unwrap(), "W7GTK");
        assert!(decode_secret(&format!("  {}\n", bare)).is_ok());
    }

    #[test]
    fn test_invalid_secret() {
        assert!(matches!(
            guard_code_for_bucket("not*base64!", 1),
            Err(CodeGenerationError::InvalidSecret(_))
        ));
        assert!(matches!(
            guard_code_for_bucket("   ", 1),
            Err(CodeGenerationError::InvalidSecret(_))
        ));
    }

    #[test]
    fn test_time_bucket() {
        assert_eq!(time_bucket(0), 0);
        assert_eq!(time_bucket(29), 0);
        assert_eq!(time_bucket(30), 1);
        assert_eq!(time_bucket(1_686_900_000), 56_230_000);
    }

    #[tokio::test]
    async fn test_generate_uses_server_clock() {
        let clock = FixedClock(1_686_900_000);
        assert_eq!(generate_guard_code(SECRET, &clock).await.unwrap(), "M73JC");
    }

    #[tokio::test]
    async fn test_generate_fails_without_clock() {
        let err = generate_guard_code(SECRET, &DownClock).await.unwrap_err();
        assert!(matches!(err, CodeGenerationError::TimeSource(_)));
    }

    #[test]
    fn test_sign_payload() {
        let identity = "ZGVmZ2hpamtsbW5vcHFyc3R1dnc=";
        assert_eq!(
            sign_payload(identity, b"4871292305").unwrap(),
            "CDvIYo1O3DKVkGXqKCzGk9MOcrI="
        );
    }
}
