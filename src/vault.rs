//! Bot secret sealing with AES-256-GCM and an Argon2id-derived key
//!
//! The password and both provider secrets of a bot are sealed together as one
//! JSON document. Only the account name and device id are stored in clear.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Secret part of a bot's credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSecrets {
    pub password: String,
    pub shared_secret: String,
    pub identity_secret: String,
}

/// Ciphertext plus what is needed to open it again
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedSecrets {
    pub ciphertext: Vec<u8>,
    /// Argon2id salt (16 bytes)
    pub salt: Vec<u8>,
    /// AES-GCM nonce (12 bytes)
    pub nonce: Vec<u8>,
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let mut key_bytes = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key_bytes)
        .map_err(|e| anyhow!("Failed to derive vault key: {}", e))?;
    Ok(key_bytes)
}

/// Seal bot secrets under the vault passphrase
pub fn seal(secrets: &BotSecrets, passphrase: &str) -> Result<SealedSecrets> {
    if passphrase.is_empty() {
        return Err(anyhow!("Vault passphrase is empty"));
    }

    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let key_bytes = derive_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

    let plaintext = serde_json::to_vec(secrets).context("Failed to encode bot secrets")?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(SealedSecrets {
        ciphertext,
        salt: salt.to_vec(),
        nonce: nonce_bytes.to_vec(),
    })
}

/// Open sealed secrets; fails on a wrong passphrase or tampered ciphertext
pub fn open(sealed: &SealedSecrets, passphrase: &str) -> Result<BotSecrets> {
    if sealed.nonce.len() != 12 {
        return Err(anyhow!("Sealed secrets carry a {}-byte nonce", sealed.nonce.len()));
    }

    let key_bytes = derive_key(passphrase, &sealed.salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
        .map_err(|_| anyhow!("Decryption failed - incorrect vault passphrase"))?;

    serde_json::from_slice(&plaintext).context("Sealed bot secrets are not valid JSON")
}
