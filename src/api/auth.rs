//! Challenge nonces and device login.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::now;
use crate::session::attestation::{
    attestation_message, issue_nonce, verify_and_consume, Attestation, Purpose,
};
use crate::session::{issue_token, SessionClaims, TOKEN_TTL_SECS};
use crate::store::users;
use crate::vote::{current_ts_bucket, TS_BUCKET_SECS};

use super::error::ApiError;
use super::Ctx;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub device_id: String,
    pub purpose: Purpose,
}

/// POST /api/v1/auth/challenge
pub async fn challenge(
    State(ctx): State<Ctx>,
    Json(body): Json<ChallengeRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.device_id.is_empty() {
        return Err(ApiError::Validation("deviceId is required".into()));
    }
    let (nonce, expires_at) = issue_nonce(&ctx.cache, &body.device_id, body.purpose);
    Ok(Json(json!({ "nonce": nonce, "expiresAt": expires_at })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub device_id: String,
    pub attestation: Attestation,
    pub timestamp_bucket: i64,
}

/// POST /api/v1/auth/login
///
/// The device proves possession of its enrolled key over a fresh login
/// nonce; a short-lived session token comes back. No demographic data rides
/// in the token.
pub async fn login(
    State(ctx): State<Ctx>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let bucket = current_ts_bucket(now());
    if (body.timestamp_bucket - bucket).abs() > 1 {
        return Err(ApiError::Validation(format!(
            "timestampBucket must be current ({TS_BUCKET_SECS}s buckets)"
        )));
    }

    let thumbprint = ctx
        .registry
        .hash(&ctx.keys.device_salt, &[&body.attestation.device_pub_key]);
    let user = users::by_device_thumbprint(&ctx.pool, &thumbprint)
        .await?
        .ok_or_else(|| ApiError::Auth("device is not enrolled".into()))?;

    let message = attestation_message(&body.attestation.nonce, None, None, body.timestamp_bucket);
    verify_and_consume(
        &ctx.cache,
        &ctx.registry,
        &ctx.keys.device_salt,
        &user.device_thumbprint,
        &body.device_id,
        &body.attestation,
        Purpose::Login,
        &message,
    )?;

    let claims = SessionClaims::for_user(&user.id, &user.pn_hash, &user.device_thumbprint);
    let token = issue_token(&ctx.keys.session_signing, &claims);
    Ok(Json(json!({
        "token": token,
        "expiresAt": now() + TOKEN_TTL_SECS,
        "userId": user.id,
    })))
}
