//! Admin operations (API-key guarded, exempt from global rate limits).

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::now;
use crate::polls::{check_publishable, current_year, AudienceRules, PollError, PollType};
use crate::store::polls as poll_store;
use crate::store::regions::{self, Region};
use crate::store::users;

use super::error::ApiError;
use super::Ctx;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub poll_type: PollType,
    pub starts_at: i64,
    pub ends_at: i64,
    #[serde(default)]
    pub audience_rules: Value,
    pub min_k: Option<u32>,
    pub reward_amount: Option<i64>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub questions: Vec<QuestionInput>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionInput {
    pub prompt: String,
    pub options: Vec<String>,
}

/// POST /api/v1/admin/polls
pub async fn create_poll(
    State(ctx): State<Ctx>,
    Json(body): Json<CreatePollRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.title.trim().is_empty() {
        return Err(ApiError::Validation("title is required".into()));
    }
    if body.starts_at >= body.ends_at {
        return Err(ApiError::Validation("startsAt must precede endsAt".into()));
    }
    let rules = if body.audience_rules.is_null() {
        AudienceRules::universe()
    } else {
        serde_json::from_value(body.audience_rules.clone())
            .map_err(|e| ApiError::Validation(format!("audienceRules: {e}")))?
    };
    for code in &rules.regions {
        if !code.starts_with("reg_") {
            return Err(ApiError::Validation(format!(
                "region {code} is not a canonical code"
            )));
        }
        if !regions::exists(&ctx.pool, code).await? {
            return Err(ApiError::Validation(format!("unknown region {code}")));
        }
    }

    let poll = poll_store::create(
        &ctx.pool,
        &poll_store::NewPoll {
            title: body.title,
            description: body.description,
            poll_type: body.poll_type,
            starts_at: body.starts_at,
            ends_at: body.ends_at,
            audience_rules: rules,
            min_k: body.min_k.unwrap_or(ctx.config.min_k_anonymity),
            reward_amount: body.reward_amount,
            options: body.options,
            questions: body
                .questions
                .into_iter()
                .map(|q| (q.prompt, q.options))
                .collect(),
        },
    )
    .await?;
    Ok(Json(json!({ "id": poll.id, "status": poll.status })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePollRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub starts_at: i64,
    pub ends_at: i64,
    #[serde(default)]
    pub audience_rules: Value,
}

/// PUT /api/v1/admin/polls/:id - drafts only; published polls are immutable.
pub async fn update_poll(
    State(ctx): State<Ctx>,
    Path(poll_id): Path<String>,
    Json(body): Json<UpdatePollRequest>,
) -> Result<Json<Value>, ApiError> {
    let poll = poll_store::get(&ctx.pool, &poll_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("poll not found".into()))?;
    if poll.status != crate::polls::PollStatus::Draft {
        return Err(ApiError::Conflict {
            code: "CONFLICT",
            message: "only drafts can be edited".into(),
        });
    }
    if body.starts_at >= body.ends_at {
        return Err(ApiError::Validation("startsAt must precede endsAt".into()));
    }
    let rules = if body.audience_rules.is_null() {
        poll.audience_rules.clone()
    } else {
        serde_json::from_value(body.audience_rules.clone())
            .map_err(|e| ApiError::Validation(format!("audienceRules: {e}")))?
    };
    poll_store::update_draft(
        &ctx.pool,
        &poll_id,
        &body.title,
        &body.description,
        body.starts_at,
        body.ends_at,
        &rules,
    )
    .await?;
    Ok(Json(json!({ "id": poll_id, "status": "draft" })))
}

/// DELETE /api/v1/admin/polls/:id
pub async fn delete_poll(
    State(ctx): State<Ctx>,
    Path(poll_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !poll_store::delete(&ctx.pool, &poll_id).await? {
        return Err(ApiError::NotFound("poll not found".into()));
    }
    Ok(Json(json!({ "deleted": true })))
}

/// POST /api/v1/admin/polls/:id/publish
pub async fn publish_poll(
    State(ctx): State<Ctx>,
    Path(poll_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let poll = poll_store::get(&ctx.pool, &poll_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("poll not found".into()))?;
    let options = poll_store::options(&ctx.pool, &poll_id).await?;
    let questions = poll_store::questions(&ctx.pool, &poll_id).await?;

    let year = current_year();
    let audience_estimate = users::all_profiles(&ctx.pool)
        .await?
        .iter()
        .filter(|p| poll.audience_rules.matches(p, year))
        .count() as u64;

    let outcome = check_publishable(
        poll.status,
        poll.starts_at,
        poll.ends_at,
        &poll.audience_rules,
        options.len(),
        questions.len(),
        audience_estimate,
        poll.min_k,
        now(),
    )
    .map_err(|e| match e {
        PollError::NotPublishable => ApiError::Conflict {
            code: "CONFLICT",
            message: e.to_string(),
        },
        other => ApiError::Validation(other.to_string()),
    })?;

    poll_store::mark_published(&ctx.pool, &poll_id).await?;
    Ok(Json(json!({
        "id": poll_id,
        "status": "scheduled",
        "audienceEstimate": audience_estimate,
        "warning": outcome.warning,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionRequest {
    pub code: String,
    pub name_en: String,
    pub name_ka: String,
    pub parent_code: Option<String>,
}

/// POST /api/v1/admin/regions
pub async fn upsert_region(
    State(ctx): State<Ctx>,
    Json(body): Json<RegionRequest>,
) -> Result<Json<Value>, ApiError> {
    if !body.code.starts_with("reg_") {
        return Err(ApiError::Validation("region codes start with reg_".into()));
    }
    regions::upsert(
        &ctx.pool,
        &Region {
            code: body.code.clone(),
            name_en: body.name_en,
            name_ka: body.name_ka,
            parent_code: body.parent_code,
        },
    )
    .await?;
    Ok(Json(json!({ "code": body.code })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMappingRequest {
    pub legacy_id: String,
    pub code: String,
}

/// POST /api/v1/admin/regions/legacy - map a legacy UUID to a code, then
/// re-run the conversion pass.
pub async fn add_legacy_mapping(
    State(ctx): State<Ctx>,
    Json(body): Json<LegacyMappingRequest>,
) -> Result<Json<Value>, ApiError> {
    if !regions::exists(&ctx.pool, &body.code).await? {
        return Err(ApiError::Validation(format!("unknown region {}", body.code)));
    }
    regions::add_legacy_mapping(&ctx.pool, &body.legacy_id, &body.code).await?;
    let (converted, unconvertible) = regions::convert_legacy_rules(&ctx.pool).await?;
    Ok(Json(json!({
        "converted": converted,
        "unconvertible": unconvertible,
    })))
}

/// GET /api/v1/admin/secrets/health
pub async fn secrets_health(State(ctx): State<Ctx>) -> Json<Value> {
    Json(json!({ "secrets": ctx.secrets.health() }))
}
