//! Challenge nonces and device attestation.
//!
//! Flow: the client requests a nonce for a purpose, signs
//! `(nonce, pollId?, optionId?, timestampBucket)` with its device key, and
//! the server verifies the signature against the enrolled thumbprint and
//! consumes the nonce with a compare-and-delete - exactly one concurrent
//! submission can win a given nonce.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::cache::SharedCache;
use crate::crypto::CryptoRegistry;
use crate::db::now;

/// Nonce lifetime.
pub const NONCE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Vote,
    Login,
}

impl Purpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Vote => "vote",
            Purpose::Login => "login",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttestationError {
    #[error("nonce unknown, expired, or already used")]
    NonceUnusable,

    #[error("attestation encoding invalid")]
    BadEncoding,

    #[error("device key does not match enrolled thumbprint")]
    ThumbprintMismatch,

    #[error("attestation signature invalid")]
    BadSignature,
}

/// Device-signed statement accompanying a ballot or login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// Ed25519 public key, base64.
    pub device_pub_key: String,
    /// Signature over the attestation message, base64.
    pub signature: String,
    pub nonce: String,
}

fn nonce_key(device_id: &str, nonce: &str) -> String {
    format!("nonce:{device_id}:{nonce}")
}

/// Issue a 128-bit nonce bound to a device and purpose.
pub fn issue_nonce(cache: &SharedCache, device_id: &str, purpose: Purpose) -> (String, i64) {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let nonce = hex::encode(bytes);
    cache.set_text(&nonce_key(device_id, &nonce), purpose.as_str(), Some(NONCE_TTL));
    (nonce, now() + NONCE_TTL.as_secs() as i64)
}

/// The exact bytes a device signs.
pub fn attestation_message(
    nonce: &str,
    poll_id: Option<&str>,
    option_id: Option<&str>,
    ts_bucket: i64,
) -> String {
    format!(
        "{nonce}|{}|{}|{ts_bucket}",
        poll_id.unwrap_or(""),
        option_id.unwrap_or("")
    )
}

/// Verify an attestation and consume its nonce.
///
/// The thumbprint and signature checks run first; the nonce is consumed
/// last, atomically, so a malformed request never burns a live nonce.
pub fn verify_and_consume(
    cache: &SharedCache,
    registry: &CryptoRegistry,
    device_salt: &[u8; 32],
    enrolled_thumbprint: &str,
    device_id: &str,
    attestation: &Attestation,
    purpose: Purpose,
    message: &str,
) -> Result<(), AttestationError> {
    let presented_thumb = registry.hash(device_salt, &[&attestation.device_pub_key]);
    if !registry.verify(device_salt, enrolled_thumbprint, &[&attestation.device_pub_key]) {
        tracing::debug!(%presented_thumb, "thumbprint mismatch");
        return Err(AttestationError::ThumbprintMismatch);
    }

    let pub_key = B64
        .decode(&attestation.device_pub_key)
        .map_err(|_| AttestationError::BadEncoding)?;
    let signature = B64
        .decode(&attestation.signature)
        .map_err(|_| AttestationError::BadEncoding)?;
    UnparsedPublicKey::new(&ED25519, pub_key)
        .verify(message.as_bytes(), &signature)
        .map_err(|_| AttestationError::BadSignature)?;

    let key = nonce_key(device_id, &attestation.nonce);
    if !cache.compare_and_delete(&key, purpose.as_str()) {
        return Err(AttestationError::NonceUnusable);
    }
    Ok(())
}
