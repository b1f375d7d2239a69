//! Audit chain rows.
//!
//! Appends happen only inside the ballot transaction in `store::votes`; this
//! module covers reads and anchor receipts.

use sqlx::{Row, SqlitePool};

use crate::chain::ChainEntry;
use crate::db::now;

use super::StoreError;

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> ChainEntry {
    ChainEntry {
        seq: row.get("seq"),
        vote_id: row.get("vote_id"),
        poll_id: row.get("poll_id"),
        option_ref: row.get("option_ref"),
        ts_bucket: row.get("ts_bucket"),
        prev_hash: row.get("prev_hash"),
        entry_hash: row.get("entry_hash"),
        anchor_receipt: row.get("anchor_receipt"),
        anchored_at: row.get("anchored_at"),
    }
}

pub async fn entry(pool: &SqlitePool, seq: i64) -> Result<Option<ChainEntry>, StoreError> {
    let row = sqlx::query("SELECT * FROM audit_chain_entries WHERE seq = ?")
        .bind(seq)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_entry))
}

pub async fn head(pool: &SqlitePool) -> Result<Option<ChainEntry>, StoreError> {
    let row = sqlx::query("SELECT * FROM audit_chain_entries ORDER BY seq DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_entry))
}

/// Highest sequence that has been anchored, if any.
pub async fn last_anchored(pool: &SqlitePool) -> Result<Option<ChainEntry>, StoreError> {
    let row = sqlx::query(
        "SELECT * FROM audit_chain_entries WHERE anchor_receipt IS NOT NULL ORDER BY seq DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_entry))
}

/// Record the ledger receipt against the anchored entry.
pub async fn record_anchor(pool: &SqlitePool, seq: i64, receipt: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE audit_chain_entries SET anchor_receipt = ?, anchored_at = ? WHERE seq = ?")
        .bind(receipt)
        .bind(now())
        .bind(seq)
        .execute(pool)
        .await?;
    Ok(())
}
