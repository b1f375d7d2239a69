//! The atomic ballot write.
//!
//! One transaction inserts the nullifier (uniqueness is the duplicate-vote
//! guard - no application lock), the anonymous vote row, the chain entry
//! computed against the in-transaction tail, and the attestation row. Any
//! failure rolls the whole set back; no partial ballot is ever visible.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::chain::{self, GENESIS_HASH};

use super::StoreError;

/// Everything the ballot transaction writes.
#[derive(Debug, Clone)]
pub struct BallotRecord {
    pub poll_id: String,
    pub option_id: Option<String>,
    pub survey_response: Option<serde_json::Value>,
    /// Pre-bucketed demographic snapshot. Nothing here identifies a voter.
    pub gender: String,
    pub birth_bucket: String,
    pub region_code: String,
    pub ts_bucket: i64,
    pub nullifier_hash: String,
    pub attestation_payload: String,
    pub device_thumbprint_hash: String,
    pub nonce: String,
}

/// Outcome of an accepted ballot.
#[derive(Debug, Clone)]
pub struct AcceptedBallot {
    pub vote_id: String,
    pub chain_seq: i64,
    pub entry_hash: String,
}

/// Insert a ballot atomically. A duplicate `(poll_id, nullifier_hash)`
/// surfaces as `StoreError::Duplicate` with nothing written.
pub async fn insert_ballot(pool: &SqlitePool, record: &BallotRecord) -> Result<AcceptedBallot, StoreError> {
    let vote_id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    // 1. Nullifier uniqueness via the primary key.
    let inserted = sqlx::query("INSERT INTO vote_nullifiers (poll_id, nullifier_hash) VALUES (?, ?)")
        .bind(&record.poll_id)
        .bind(&record.nullifier_hash)
        .execute(&mut *tx)
        .await;
    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            return Err(StoreError::Duplicate);
        }
        return Err(e.into());
    }

    // 2. Anonymous vote row.
    let survey_json = record
        .survey_response
        .as_ref()
        .map(|v| serde_json::to_string(v).expect("survey response serialize"));
    sqlx::query(
        "INSERT INTO votes (id, poll_id, option_id, survey_response, gender, birth_bucket, region_code, cast_at_bucket)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&vote_id)
    .bind(&record.poll_id)
    .bind(&record.option_id)
    .bind(&survey_json)
    .bind(&record.gender)
    .bind(&record.birth_bucket)
    .bind(&record.region_code)
    .bind(record.ts_bucket)
    .execute(&mut *tx)
    .await?;

    // 3. Chain append against the tail read inside this write transaction,
    //    which serializes concurrent ballots through the tail row.
    let tail = sqlx::query("SELECT seq, entry_hash FROM audit_chain_entries ORDER BY seq DESC LIMIT 1")
        .fetch_optional(&mut *tx)
        .await?;
    let (prev_seq, prev_hash) = match &tail {
        Some(row) => (row.get::<i64, _>("seq"), row.get::<String, _>("entry_hash")),
        None => (0, GENESIS_HASH.to_string()),
    };
    let seq = prev_seq + 1;
    let option_ref = record.option_id.clone().unwrap_or_else(|| "survey".to_string());
    let entry_hash = chain::entry_hash(&prev_hash, &vote_id, &record.poll_id, &option_ref, record.ts_bucket);
    sqlx::query(
        "INSERT INTO audit_chain_entries (seq, vote_id, poll_id, option_ref, ts_bucket, prev_hash, entry_hash)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(seq)
    .bind(&vote_id)
    .bind(&record.poll_id)
    .bind(&option_ref)
    .bind(record.ts_bucket)
    .bind(&prev_hash)
    .bind(&entry_hash)
    .execute(&mut *tx)
    .await?;

    // 4. Attestation, kept apart from the ballot tables.
    sqlx::query(
        "INSERT INTO vote_attestations (vote_id, payload, device_thumbprint_hash, nonce)
         VALUES (?, ?, ?, ?)",
    )
    .bind(&vote_id)
    .bind(&record.attestation_payload)
    .bind(&record.device_thumbprint_hash)
    .bind(&record.nonce)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(AcceptedBallot {
        vote_id,
        chain_seq: seq,
        entry_hash,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

/// A vote row as the aggregator sees it.
#[derive(Debug, Clone)]
pub struct VoteRow {
    pub option_id: Option<String>,
    pub survey_response: Option<serde_json::Value>,
    pub gender: String,
    pub birth_bucket: String,
    pub region_code: String,
}

pub async fn rows_for_poll(pool: &SqlitePool, poll_id: &str) -> Result<Vec<VoteRow>, StoreError> {
    let rows = sqlx::query(
        "SELECT option_id, survey_response, gender, birth_bucket, region_code FROM votes WHERE poll_id = ?",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let survey_response = row
                .get::<Option<String>, _>("survey_response")
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?;
            Ok(VoteRow {
                option_id: row.get("option_id"),
                survey_response,
                gender: row.get("gender"),
                birth_bucket: row.get("birth_bucket"),
                region_code: row.get("region_code"),
            })
        })
        .collect()
}

pub async fn count_for_poll(pool: &SqlitePool, poll_id: &str) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM votes WHERE poll_id = ?")
        .bind(poll_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

pub async fn nullifier_count(pool: &SqlitePool, poll_id: &str) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM vote_nullifiers WHERE poll_id = ?")
        .bind(poll_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}
