//! Ephemeral enrollment sessions.
//!
//! Short-lived rows tracking a device's progress through the enrollment
//! state machine. At most one non-terminal session per device (enforced by a
//! partial unique index); expired rows are reaped by a background worker.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::now;
use crate::enrollment::EnrollmentState;

use super::StoreError;

/// Session time-to-live: one hour.
pub const SESSION_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct EnrollmentSessionRow {
    pub id: String,
    pub device_id: String,
    pub state: EnrollmentState,
    pub document: Option<String>,
    pub liveness_score: Option<f64>,
    pub face_match_score: Option<f64>,
    pub attempts: i64,
    pub created_at: i64,
    pub expires_at: i64,
}

impl EnrollmentSessionRow {
    pub fn expired(&self, at: i64) -> bool {
        self.expires_at <= at
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<EnrollmentSessionRow, StoreError> {
    let raw_state: String = row.get("state");
    let state = EnrollmentState::parse(&raw_state)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown enrollment state {raw_state}")))?;
    Ok(EnrollmentSessionRow {
        id: row.get("id"),
        device_id: row.get("device_id"),
        state,
        document: row.get("document"),
        liveness_score: row.get("liveness_score"),
        face_match_score: row.get("face_match_score"),
        attempts: row.get("attempts"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    })
}

/// Open a session for a device. Fails with `Conflict` semantics (unique
/// violation) when the device already has a live one.
pub async fn create(pool: &SqlitePool, device_id: &str) -> Result<EnrollmentSessionRow, StoreError> {
    let ts = now();
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO enrollment_sessions (id, device_id, state, attempts, created_at, expires_at)
         VALUES (?, ?, 'started', 0, ?, ?)",
    )
    .bind(&id)
    .bind(device_id)
    .bind(ts)
    .bind(ts + SESSION_TTL_SECS)
    .execute(pool)
    .await?;
    get(pool, &id).await?.ok_or(StoreError::NotFound)
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<EnrollmentSessionRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM enrollment_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_session).transpose()
}

pub async fn set_state(
    pool: &SqlitePool,
    id: &str,
    state: EnrollmentState,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE enrollment_sessions SET state = ? WHERE id = ?")
        .bind(state.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn save_document(pool: &SqlitePool, id: &str, document: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE enrollment_sessions SET document = ?, state = ? WHERE id = ?")
        .bind(document)
        .bind(EnrollmentState::DocumentOk.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn save_scores(
    pool: &SqlitePool,
    id: &str,
    liveness: f64,
    face_match: f64,
    state: EnrollmentState,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE enrollment_sessions SET liveness_score = ?, face_match_score = ?, state = ? WHERE id = ?",
    )
    .bind(liveness)
    .bind(face_match)
    .bind(state.as_str())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Bump the failure counter; returns the new count.
pub async fn bump_attempts(pool: &SqlitePool, id: &str) -> Result<i64, StoreError> {
    sqlx::query("UPDATE enrollment_sessions SET attempts = attempts + 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    let row = sqlx::query("SELECT attempts FROM enrollment_sessions WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("attempts"))
}

/// Delete expired non-terminal sessions. Returns the reap count.
pub async fn reap_expired(pool: &SqlitePool) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM enrollment_sessions WHERE expires_at <= ? AND state NOT IN ('issued', 'failed')",
    )
    .bind(now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_memory, migrations};

    async fn pool() -> SqlitePool {
        let pool = connect_memory().await.unwrap();
        migrations::run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = pool().await;
        let session = create(&pool, "device-1").await.unwrap();
        assert_eq!(session.state, EnrollmentState::Started);
        assert_eq!(session.expires_at - session.created_at, SESSION_TTL_SECS);

        let loaded = get(&pool, &session.id).await.unwrap().unwrap();
        assert_eq!(loaded.device_id, "device-1");
    }

    #[tokio::test]
    async fn test_one_active_session_per_device() {
        let pool = pool().await;
        create(&pool, "device-1").await.unwrap();
        // Second active session for the same device violates the partial
        // unique index.
        assert!(create(&pool, "device-1").await.is_err());
        // A different device is unaffected.
        assert!(create(&pool, "device-2").await.is_ok());
    }

    #[tokio::test]
    async fn test_terminal_session_frees_device() {
        let pool = pool().await;
        let session = create(&pool, "device-1").await.unwrap();
        set_state(&pool, &session.id, EnrollmentState::Failed)
            .await
            .unwrap();
        assert!(create(&pool, "device-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_attempts_counter() {
        let pool = pool().await;
        let session = create(&pool, "device-1").await.unwrap();
        assert_eq!(bump_attempts(&pool, &session.id).await.unwrap(), 1);
        assert_eq!(bump_attempts(&pool, &session.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reap_expired() {
        let pool = pool().await;
        let session = create(&pool, "device-1").await.unwrap();
        sqlx::query("UPDATE enrollment_sessions SET expires_at = 1 WHERE id = ?")
            .bind(&session.id)
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(reap_expired(&pool).await.unwrap(), 1);
        assert!(get(&pool, &session.id).await.unwrap().is_none());
    }
}
