//! Public verifier API: chain roots, linkage proofs, suppressed results.
//!
//! Read-only and unauthenticated. A linkage mismatch discovered here is the
//! FATAL integrity condition: the process flips to read-only and refuses
//! further ballots.

use std::sync::atomic::Ordering;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::chain::{self, ChainError};
use crate::store::chain as chain_store;

use super::analytics::poll_results;
use super::error::ApiError;
use super::Ctx;

/// GET /health
pub async fn health(State(ctx): State<Ctx>) -> Json<Value> {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&ctx.pool).await.is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "readOnly": ctx.read_only.load(Ordering::SeqCst),
        "hasher": ctx.registry.hasher().name(),
    }))
}

/// GET /public/chain/head
pub async fn chain_head(State(ctx): State<Ctx>) -> Result<Json<Value>, ApiError> {
    let head = chain_store::head(&ctx.pool).await?;
    let anchored = chain_store::last_anchored(&ctx.pool).await?;
    Ok(Json(json!({
        "seq": head.as_ref().map(|e| e.seq).unwrap_or(0),
        "hash": head.as_ref().map(|e| e.entry_hash.clone()),
        "anchoredSeq": anchored.as_ref().map(|e| e.seq),
        "anchorReceipt": anchored.as_ref().and_then(|e| e.anchor_receipt.clone()),
    })))
}

/// GET /public/chain/:n - entry plus proof of linkage.
pub async fn chain_entry(
    State(ctx): State<Ctx>,
    Path(seq): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    match chain::verify_entry(&ctx.pool, seq).await {
        Ok(entry) => Ok(Json(json!({
            "entry": entry,
            "proof": {
                "prevHash": entry.prev_hash,
                "recomputedHash": chain::recompute(&entry),
                "linked": true,
            }
        }))),
        Err(ChainError::Mismatch { seq }) => {
            // Integrity violation: stop accepting ballots immediately.
            ctx.read_only.store(true, Ordering::SeqCst);
            tracing::error!(seq, "audit chain mismatch; entering read-only mode");
            Err(ApiError::Fatal(format!(
                "audit chain integrity violation at entry {seq}"
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /public/polls/:id/results - suppression applied, no auth.
pub async fn results(
    State(ctx): State<Ctx>,
    Path(poll_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let results = poll_results(&ctx, &poll_id, None).await?;
    Ok(Json(serde_json::to_value(results).expect("results serialize")))
}
