//! Aggregated results, suppression applied.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::store::polls as poll_store;
use crate::store::votes;
use crate::tally::{self, Dimension, PollResults, TallyConfig};

use super::error::ApiError;
use super::{CurrentUser, Ctx};

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    /// Optional demographic axis: gender | birth_bucket | region.
    pub dimension: Option<String>,
}

pub async fn poll_results(
    ctx: &Ctx,
    poll_id: &str,
    dimension: Option<Dimension>,
) -> Result<PollResults, ApiError> {
    let poll = poll_store::get(&ctx.pool, poll_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("poll not found".into()))?;
    let rows = votes::rows_for_poll(&ctx.pool, poll_id).await?;
    let options = poll_store::options(&ctx.pool, poll_id).await?;
    let questions = poll_store::questions(&ctx.pool, poll_id).await?;

    let k = poll.min_k.max(ctx.config.min_k_anonymity);
    let config = TallyConfig {
        k,
        noise_epsilon: ctx
            .config
            .enable_privacy_noise
            .then_some(ctx.config.privacy_noise_epsilon),
    };
    Ok(tally::tally(
        poll_id, &rows, &options, &questions, &config, dimension,
    ))
}

/// GET /api/v1/analytics/polls/:id/results
pub async fn results(
    State(ctx): State<Ctx>,
    Extension(CurrentUser(_user)): Extension<CurrentUser>,
    Path(poll_id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<PollResults>, ApiError> {
    let dimension = match &query.dimension {
        Some(raw) => Some(
            Dimension::parse(raw)
                .ok_or_else(|| ApiError::Validation(format!("unknown dimension {raw}")))?,
        ),
        None => None,
    };
    let results = poll_results(&ctx, &poll_id, dimension).await?;
    Ok(Json(results))
}
