//! Periodic anchoring of chain roots to an external ledger.
//!
//! The ledger is opaque: submit a root, get a receipt. When no ledger is
//! configured a noop client logs the would-be submission, so the rest of the
//! pipeline behaves identically in every environment.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::db::now;
use crate::store::chain as chain_store;
use sqlx::SqlitePool;

use super::ChainError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger rejected submission: {0}")]
    Rejected(String),

    #[error("ledger circuit open")]
    CircuitOpen,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a chain root; returns the ledger's receipt (e.g. a tx hash).
    async fn submit_anchor(&self, seq: i64, root_hash: &str) -> Result<String, LedgerError>;
}

/// Logs instead of submitting. Used when `LEDGER_URL` is unset.
pub struct NoopLedger;

#[async_trait]
impl LedgerClient for NoopLedger {
    async fn submit_anchor(&self, seq: i64, root_hash: &str) -> Result<String, LedgerError> {
        info!(seq, root_hash, "simulating ledger anchor submission");
        Ok(format!("noop-receipt-{seq}"))
    }
}

/// HTTP ledger client.
pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
}

impl HttpLedger {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client build"),
            base_url,
            breaker: CircuitBreaker::new("ledger"),
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedger {
    async fn submit_anchor(&self, seq: i64, root_hash: &str) -> Result<String, LedgerError> {
        if !self.breaker.allow() {
            return Err(LedgerError::CircuitOpen);
        }
        let url = format!("{}/anchors", self.base_url.trim_end_matches('/'));
        let result = async {
            let resp = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "seq": seq, "root": root_hash }))
                .send()
                .await
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            if resp.status().is_client_error() {
                return Err(LedgerError::Rejected(resp.status().to_string()));
            }
            let resp = resp
                .error_for_status()
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            body.get("receipt")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| LedgerError::Rejected("missing receipt".into()))
        }
        .await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(LedgerError::Unavailable(_)) => self.breaker.record_failure(),
            Err(_) => {}
        }
        result
    }
}

/// Anchoring cadence.
#[derive(Debug, Clone, Copy)]
pub struct AnchorPolicy {
    /// Anchor after this many new entries...
    pub every_n: u64,
    /// ...or after this many seconds since the last anchor.
    pub every_secs: u64,
}

/// Anchor the current head if the policy says it is due.
///
/// Ledger submission happens outside any DB transaction; the receipt write
/// is a single-row update afterwards.
pub async fn anchor_if_due(
    pool: &SqlitePool,
    ledger: &dyn LedgerClient,
    policy: AnchorPolicy,
) -> Result<Option<String>, ChainError> {
    let Some(head) = chain_store::head(pool).await? else {
        return Ok(None);
    };
    let last = chain_store::last_anchored(pool).await?;

    let due = match &last {
        None => true,
        Some(anchored) => {
            let entries_since = (head.seq - anchored.seq) as u64;
            let secs_since = anchored
                .anchored_at
                .map(|t| (now() - t) as u64)
                .unwrap_or(u64::MAX);
            head.seq > anchored.seq
                && (entries_since >= policy.every_n || secs_since >= policy.every_secs)
        }
    };
    if !due {
        return Ok(None);
    }

    match ledger.submit_anchor(head.seq, &head.entry_hash).await {
        Ok(receipt) => {
            chain_store::record_anchor(pool, head.seq, &receipt).await?;
            info!(seq = head.seq, "chain root anchored");
            Ok(Some(receipt))
        }
        Err(e) => {
            warn!(error = %e, "anchor submission failed; will retry next tick");
            Ok(None)
        }
    }
}
