//! Enrollment endpoints.
//!
//! Failed biometric rounds set the `x-biometric-failure` response header,
//! which the Shield's post-filter turns into risk points for the caller's IP.

use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::now;
use crate::enrollment::{BiometricEvidence, BiometricOutcome};
use crate::session::{issue_token, SessionClaims, TOKEN_TTL_SECS};
use crate::shield::BIOMETRIC_FAILURE_HEADER;

use super::error::ApiError;
use super::Ctx;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub device_id: String,
}

/// POST /api/v1/enrollment/start
pub async fn start(
    State(ctx): State<Ctx>,
    Json(body): Json<StartRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.device_id.is_empty() {
        return Err(ApiError::Validation("deviceId is required".into()));
    }
    let session = ctx.enrollment.start(&body.device_id).await?;
    Ok(Json(json!({
        "sessionId": session.id,
        "state": session.state,
        "expiresAt": session.expires_at,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    pub session_id: String,
    pub payload: Value,
}

/// POST /api/v1/enrollment/document
pub async fn document(
    State(ctx): State<Ctx>,
    Json(body): Json<DocumentRequest>,
) -> Result<Json<Value>, ApiError> {
    let session = ctx
        .enrollment
        .submit_document(&body.session_id, &body.payload)
        .await?;
    Ok(Json(json!({
        "sessionId": session.id,
        "state": session.state,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyBiometricsRequest {
    pub session_id: String,
    pub device_pub_key: String,
    pub liveness_score: f64,
    pub face_match_score: f64,
}

/// POST /api/v1/enrollment/verify-biometrics
///
/// Success issues the credential and a first session token in one step.
pub async fn verify_biometrics(
    State(ctx): State<Ctx>,
    Json(body): Json<VerifyBiometricsRequest>,
) -> Result<Response, ApiError> {
    let evidence = BiometricEvidence {
        liveness_score: body.liveness_score,
        face_match_score: body.face_match_score,
    };
    let outcome = ctx
        .enrollment
        .verify_biometrics(&body.session_id, evidence, &body.device_pub_key)
        .await?;

    match outcome {
        BiometricOutcome::Issued(user) => {
            let claims = SessionClaims::for_user(&user.id, &user.pn_hash, &user.device_thumbprint);
            let token = issue_token(&ctx.keys.session_signing, &claims);
            Ok(Json(json!({
                "state": "issued",
                "userId": user.id,
                "token": token,
                "expiresAt": now() + TOKEN_TTL_SECS,
            }))
            .into_response())
        }
        BiometricOutcome::Retry {
            state,
            attempts_left,
        } => Ok(with_biometric_failure(
            Json(json!({
                "state": state,
                "attemptsLeft": attempts_left,
            }))
            .into_response(),
        )),
        BiometricOutcome::Failed => Ok(with_biometric_failure(
            (
                axum::http::StatusCode::FORBIDDEN,
                Json(json!({
                    "error": {
                        "code": "FORBIDDEN",
                        "message": "enrollment failed: attempt budget exhausted",
                        "statusCode": 403,
                    }
                })),
            )
                .into_response(),
        )),
    }
}

fn with_biometric_failure(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(BIOMETRIC_FAILURE_HEADER, HeaderValue::from_static("1"));
    response
}
