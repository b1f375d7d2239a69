//! Signed session tokens.
//!
//! Compact `b64url(claims).b64url(mac)` strings signed with the session key.
//! Claims carry identity only (user id, pn hash, device thumbprint) - never
//! demographics. Eligibility is re-evaluated from the persistent user record
//! on every protected call, so a stale token cannot smuggle old region or
//! age data past the rules.

pub mod attestation;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::constant_time::verify_slices_are_equal;
use ring::hmac;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::now;

/// Token lifetime: 15 minutes.
pub const TOKEN_TTL_SECS: i64 = 900;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed token")]
    Malformed,

    #[error("bad token signature")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    pub pn_hash: String,
    /// Device-key thumbprint the session is bound to.
    pub thumb: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn for_user(user_id: &str, pn_hash: &str, thumbprint: &str) -> Self {
        let iat = now();
        Self {
            sub: user_id.to_string(),
            pn_hash: pn_hash.to_string(),
            thumb: thumbprint.to_string(),
            iat,
            exp: iat + TOKEN_TTL_SECS,
        }
    }
}

pub fn issue_token(signing_key: &[u8; 32], claims: &SessionClaims) -> String {
    let payload = serde_json::to_vec(claims).expect("claims serialize");
    let body = URL_SAFE_NO_PAD.encode(&payload);
    let key = hmac::Key::new(hmac::HMAC_SHA256, signing_key);
    let mac = hmac::sign(&key, body.as_bytes());
    format!("{body}.{}", URL_SAFE_NO_PAD.encode(mac.as_ref()))
}

pub fn verify_token(signing_key: &[u8; 32], token: &str) -> Result<SessionClaims, SessionError> {
    let (body, mac_b64) = token.split_once('.').ok_or(SessionError::Malformed)?;
    let presented_mac = URL_SAFE_NO_PAD
        .decode(mac_b64)
        .map_err(|_| SessionError::Malformed)?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, signing_key);
    let expected_mac = hmac::sign(&key, body.as_bytes());
    verify_slices_are_equal(expected_mac.as_ref(), &presented_mac)
        .map_err(|_| SessionError::BadSignature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| SessionError::Malformed)?;
    let claims: SessionClaims =
        serde_json::from_slice(&payload).map_err(|_| SessionError::Malformed)?;
    if claims.exp <= now() {
        return Err(SessionError::Expired);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn test_round_trip() {
        let claims = SessionClaims::for_user("user-1", "pn-hash", "thumb");
        let token = issue_token(&KEY, &claims);
        let verified = verify_token(&KEY, &token).unwrap();
        assert_eq!(verified.sub, "user-1");
        assert_eq!(verified.thumb, "thumb");
    }

    #[test]
    fn test_wrong_key_rejected() {
        let claims = SessionClaims::for_user("user-1", "pn-hash", "thumb");
        let token = issue_token(&KEY, &claims);
        assert!(matches!(
            verify_token(&[8u8; 32], &token),
            Err(SessionError::BadSignature)
        ));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let claims = SessionClaims::for_user("user-1", "pn-hash", "thumb");
        let token = issue_token(&KEY, &claims);
        let (body, mac) = token.split_once('.').unwrap();
        let mut other = SessionClaims::for_user("user-2", "pn-hash", "thumb");
        other.exp = claims.exp;
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&other).unwrap());
        assert_ne!(body, forged_body);
        let forged = format!("{forged_body}.{mac}");
        assert!(matches!(
            verify_token(&KEY, &forged),
            Err(SessionError::BadSignature)
        ));
    }

    #[test]
    fn test_expired_rejected() {
        let mut claims = SessionClaims::for_user("user-1", "pn-hash", "thumb");
        claims.exp = now() - 1;
        let token = issue_token(&KEY, &claims);
        assert!(matches!(
            verify_token(&KEY, &token),
            Err(SessionError::Expired)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            verify_token(&KEY, "garbage"),
            Err(SessionError::Malformed)
        ));
        assert!(matches!(
            verify_token(&KEY, "a.b"),
            Err(SessionError::Malformed)
        ));
    }
}
