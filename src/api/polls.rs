//! Poll listing and ballot submission.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::polls::{current_year, PollStatus};
use crate::ratelimit;
use crate::session::attestation::Attestation;
use crate::store::polls as poll_store;
use crate::vote::VoteRequest;

use super::error::ApiError;
use super::{CurrentUser, Ctx};

fn poll_json(poll: &poll_store::Poll) -> Value {
    json!({
        "id": poll.id,
        "title": poll.title,
        "description": poll.description,
        "type": poll.poll_type,
        "status": poll.status,
        "startsAt": poll.starts_at,
        "endsAt": poll.ends_at,
        "minK": poll.min_k,
        "rewardAmount": poll.reward_amount,
    })
}

/// GET /api/v1/polls - active polls the caller is eligible for.
pub async fn list(
    State(ctx): State<Ctx>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Value>, ApiError> {
    let year = current_year();
    let profile = user.profile();
    let mut eligible = Vec::new();
    for poll in poll_store::active(&ctx.pool).await? {
        if poll.audience_rules.has_legacy_region_ids() {
            continue;
        }
        if !poll.audience_rules.matches(&profile, year) {
            continue;
        }
        let options = poll_store::options(&ctx.pool, &poll.id).await?;
        let questions = poll_store::questions(&ctx.pool, &poll.id).await?;
        let mut entry = poll_json(&poll);
        entry["options"] = serde_json::to_value(&options).expect("options serialize");
        if !questions.is_empty() {
            entry["questions"] = serde_json::to_value(&questions).expect("questions serialize");
        }
        eligible.push(entry);
    }
    Ok(Json(json!({ "polls": eligible })))
}

/// GET /api/v1/polls/:id
pub async fn get_poll(
    State(ctx): State<Ctx>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(poll_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let poll = poll_store::get(&ctx.pool, &poll_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("poll not found".into()))?;
    if poll.status != PollStatus::Active {
        return Err(ApiError::NotFound("poll not found".into()));
    }
    if !poll.audience_rules.matches(&user.profile(), current_year()) {
        return Err(ApiError::not_eligible());
    }
    let options = poll_store::options(&ctx.pool, &poll.id).await?;
    let questions = poll_store::questions(&ctx.pool, &poll.id).await?;
    let mut entry = poll_json(&poll);
    entry["options"] = serde_json::to_value(&options).expect("options serialize");
    if !questions.is_empty() {
        entry["questions"] = serde_json::to_value(&questions).expect("questions serialize");
    }
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteBody {
    pub device_id: String,
    pub option_id: Option<String>,
    pub survey_response: Option<Value>,
    pub attestation: Attestation,
    pub timestamp_bucket: i64,
    /// Compressed Groth16 proof, base64.
    pub proof: Option<String>,
}

/// POST /api/v1/polls/:id/vote
pub async fn vote(
    State(ctx): State<Ctx>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(poll_id): Path<String>,
    Json(body): Json<VoteBody>,
) -> Result<Json<Value>, ApiError> {
    // Per-credential quota on top of the per-IP middleware limit.
    if let Err(retry) = ctx.limiter.check(&ratelimit::VOTE, &user.pn_hash) {
        return Err(ApiError::RateLimited {
            retry_after: retry.seconds,
        });
    }

    let proof = body
        .proof
        .as_deref()
        .map(|raw| B64.decode(raw))
        .transpose()
        .map_err(|_| ApiError::Validation("proof is not valid base64".into()))?;

    let request = VoteRequest {
        device_id: body.device_id,
        option_id: body.option_id,
        survey_response: body.survey_response,
        attestation: body.attestation,
        ts_bucket: body.timestamp_bucket,
        proof,
    };
    let receipt = ctx.pipeline.cast(&user, &poll_id, &request).await?;
    Ok(Json(json!({
        "chainSeq": receipt.chain_seq,
        "entryHash": receipt.entry_hash,
    })))
}
