//! Participation reward credits.
//!
//! Credited post-commit (fire-and-forget) when a poll has rewards enabled,
//! and dispatched by a background worker. Records participation only; never
//! joined to the ballot tables.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::now;

use super::StoreError;

#[derive(Debug, Clone)]
pub struct RewardCredit {
    pub id: String,
    pub user_id: String,
    pub poll_id: String,
    pub amount: i64,
}

pub async fn credit(pool: &SqlitePool, user_id: &str, poll_id: &str, amount: i64) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO user_rewards (id, user_id, poll_id, amount, status, created_at)
         VALUES (?, ?, ?, ?, 'pending', ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(poll_id)
    .bind(amount)
    .bind(now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn pending(pool: &SqlitePool, limit: i64) -> Result<Vec<RewardCredit>, StoreError> {
    let rows = sqlx::query(
        "SELECT id, user_id, poll_id, amount FROM user_rewards WHERE status = 'pending' ORDER BY created_at LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| RewardCredit {
            id: row.get("id"),
            user_id: row.get("user_id"),
            poll_id: row.get("poll_id"),
            amount: row.get("amount"),
        })
        .collect())
}

pub async fn mark_dispatched(pool: &SqlitePool, id: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE user_rewards SET status = 'dispatched' WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
