//! Admin API keys.
//!
//! Only the keyed hash of a key is stored; the caller-presented key is
//! re-hashed and looked up on every admin request.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::now;

use super::StoreError;

pub async fn insert(pool: &SqlitePool, key_hash: &str, label: &str) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO api_keys (id, key_hash, label, created_at, revoked) VALUES (?, ?, ?, ?, 0)")
        .bind(&id)
        .bind(key_hash)
        .bind(label)
        .bind(now())
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn is_valid(pool: &SqlitePool, key_hash: &str) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM api_keys WHERE key_hash = ? AND revoked = 0")
        .bind(key_hash)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n") > 0)
}

pub async fn revoke(pool: &SqlitePool, id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE api_keys SET revoked = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
