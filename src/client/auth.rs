//! Credential signing for the WebSocket handshake
//!
//! The Miniserver answers `jdev/sys/getkey` with a hex encoded one-time key.
//! The client proves its credentials by sending the HMAC-SHA1 of
//! `"{username}:{password}"` keyed with that key.

use crate::config::credentials::LoxoneCredentials;
use crate::error::{LoxoneError, Result};

#[cfg(feature = "crypto-openssl")]
use openssl::{hash::MessageDigest, pkey::PKey, sign::Signer};

/// Compute the hex encoded HMAC-SHA1 signature for an authenticate command
pub fn sign_credentials(nonce_hex: &str, username: &str, password: &str) -> Result<String> {
    if nonce_hex.is_empty() {
        return Err(LoxoneError::authentication("No key received from Miniserver"));
    }
    if username.is_empty() || password.is_empty() {
        return Err(LoxoneError::credentials("Username and password are required"));
    }

    let key = hex::decode(nonce_hex)
        .map_err(|e| LoxoneError::crypto(format!("Failed to decode key: {e}")))?;
    let signature = hmac_sha1(&key, format!("{username}:{password}").as_bytes())?;
    Ok(hex::encode(signature))
}

impl LoxoneCredentials {
    /// Sign these credentials with a key received from the Miniserver
    pub fn sign(&self, nonce_hex: &str) -> Result<String> {
        sign_credentials(nonce_hex, &self.username, &self.password)
    }
}

#[cfg(feature = "crypto-openssl")]
fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let pkey = PKey::hmac(key)
        .map_err(|e| LoxoneError::crypto(format!("Failed to create HMAC key: {e}")))?;
    let mut signer = Signer::new(MessageDigest::sha1(), &pkey)
        .map_err(|e| LoxoneError::crypto(format!("Failed to create signer: {e}")))?;
    signer
        .update(data)
        .map_err(|e| LoxoneError::crypto(format!("Failed to update signer: {e}")))?;
    signer
        .sign_to_vec()
        .map_err(|e| LoxoneError::crypto(format!("Failed to sign: {e}")))
}

/// HMAC stub for builds without crypto support
#[cfg(not(feature = "crypto-openssl"))]
fn hmac_sha1(_key: &[u8], _data: &[u8]) -> Result<Vec<u8>> {
    Err(LoxoneError::crypto(
        "Crypto features not enabled - cannot sign credentials".to_string(),
    ))
}
