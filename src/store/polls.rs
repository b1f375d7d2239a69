//! Poll rows and their ordered children.
//!
//! A poll and its options/questions are written in one transaction; children
//! cascade on delete. Audience rules are stored as JSON but parsed into the
//! validated structure on every read.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::now;
use crate::polls::{AudienceRules, PollStatus, PollType};

use super::StoreError;

#[derive(Debug, Clone)]
pub struct Poll {
    pub id: String,
    pub title: String,
    pub description: String,
    pub poll_type: PollType,
    pub status: PollStatus,
    pub starts_at: i64,
    pub ends_at: i64,
    pub published_at: Option<i64>,
    pub audience_rules: AudienceRules,
    pub min_k: u32,
    pub reward_amount: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PollOption {
    pub id: String,
    pub label: String,
    pub position: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SurveyQuestion {
    pub id: String,
    pub prompt: String,
    pub position: i64,
    pub options: Vec<PollOption>,
}

/// Input for poll creation.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub title: String,
    pub description: String,
    pub poll_type: PollType,
    pub starts_at: i64,
    pub ends_at: i64,
    pub audience_rules: AudienceRules,
    pub min_k: u32,
    pub reward_amount: Option<i64>,
    pub options: Vec<String>,
    pub questions: Vec<(String, Vec<String>)>,
}

fn row_to_poll(row: &sqlx::sqlite::SqliteRow) -> Result<Poll, StoreError> {
    let raw_type: String = row.get("poll_type");
    let raw_status: String = row.get("status");
    Ok(Poll {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        poll_type: PollType::parse(&raw_type)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown poll type {raw_type}")))?,
        status: PollStatus::parse(&raw_status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown poll status {raw_status}")))?,
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        published_at: row.get("published_at"),
        audience_rules: AudienceRules::from_json(&row.get::<String, _>("audience_rules"))
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        min_k: row.get::<i64, _>("min_k") as u32,
        reward_amount: row.get("reward_amount"),
        created_at: row.get("created_at"),
    })
}

/// Create a poll with its options and survey questions in one transaction.
pub async fn create(pool: &SqlitePool, input: &NewPoll) -> Result<Poll, StoreError> {
    let poll_id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO polls (id, title, description, poll_type, status, starts_at, ends_at,
                            audience_rules, min_k, reward_amount, created_at)
         VALUES (?, ?, ?, ?, 'draft', ?, ?, ?, ?, ?, ?)",
    )
    .bind(&poll_id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(input.poll_type.as_str())
    .bind(input.starts_at)
    .bind(input.ends_at)
    .bind(input.audience_rules.to_json())
    .bind(input.min_k as i64)
    .bind(input.reward_amount)
    .bind(now())
    .execute(&mut *tx)
    .await?;

    for (position, label) in input.options.iter().enumerate() {
        sqlx::query("INSERT INTO poll_options (id, poll_id, label, position) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(&poll_id)
            .bind(label)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
    }

    for (position, (prompt, option_labels)) in input.questions.iter().enumerate() {
        let question_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO survey_questions (id, poll_id, prompt, position) VALUES (?, ?, ?, ?)",
        )
        .bind(&question_id)
        .bind(&poll_id)
        .bind(prompt)
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
        for (opt_position, label) in option_labels.iter().enumerate() {
            sqlx::query(
                "INSERT INTO question_options (id, question_id, label, position) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&question_id)
            .bind(label)
            .bind(opt_position as i64)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    get(pool, &poll_id).await?.ok_or(StoreError::NotFound)
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<Poll>, StoreError> {
    let row = sqlx::query("SELECT * FROM polls WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_poll).transpose()
}

pub async fn options(pool: &SqlitePool, poll_id: &str) -> Result<Vec<PollOption>, StoreError> {
    let rows =
        sqlx::query("SELECT id, label, position FROM poll_options WHERE poll_id = ? ORDER BY position")
            .bind(poll_id)
            .fetch_all(pool)
            .await?;
    Ok(rows
        .iter()
        .map(|row| PollOption {
            id: row.get("id"),
            label: row.get("label"),
            position: row.get("position"),
        })
        .collect())
}

pub async fn questions(pool: &SqlitePool, poll_id: &str) -> Result<Vec<SurveyQuestion>, StoreError> {
    let rows =
        sqlx::query("SELECT id, prompt, position FROM survey_questions WHERE poll_id = ? ORDER BY position")
            .bind(poll_id)
            .fetch_all(pool)
            .await?;
    let mut questions = Vec::with_capacity(rows.len());
    for row in &rows {
        let question_id: String = row.get("id");
        let option_rows = sqlx::query(
            "SELECT id, label, position FROM question_options WHERE question_id = ? ORDER BY position",
        )
        .bind(&question_id)
        .fetch_all(pool)
        .await?;
        questions.push(SurveyQuestion {
            id: question_id,
            prompt: row.get("prompt"),
            position: row.get("position"),
            options: option_rows
                .iter()
                .map(|r| PollOption {
                    id: r.get("id"),
                    label: r.get("label"),
                    position: r.get("position"),
                })
                .collect(),
        });
    }
    Ok(questions)
}

/// Does this poll have an option with the given id?
pub async fn has_option(pool: &SqlitePool, poll_id: &str, option_id: &str) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM poll_options WHERE poll_id = ? AND id = ?")
        .bind(poll_id)
        .bind(option_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n") > 0)
}

pub async fn set_status(pool: &SqlitePool, id: &str, status: PollStatus) -> Result<(), StoreError> {
    sqlx::query("UPDATE polls SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a draft published: stamps `published_at` and moves it to scheduled
/// (the status monitor promotes it to active when the window opens).
pub async fn mark_published(pool: &SqlitePool, id: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE polls SET status = 'scheduled', published_at = ? WHERE id = ?")
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Update the mutable fields of a draft.
pub async fn update_draft(
    pool: &SqlitePool,
    id: &str,
    title: &str,
    description: &str,
    starts_at: i64,
    ends_at: i64,
    rules: &AudienceRules,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE polls SET title = ?, description = ?, starts_at = ?, ends_at = ?, audience_rules = ?
         WHERE id = ? AND status = 'draft'",
    )
    .bind(title)
    .bind(description)
    .bind(starts_at)
    .bind(ends_at)
    .bind(rules.to_json())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_rules(pool: &SqlitePool, id: &str, rules: &AudienceRules) -> Result<(), StoreError> {
    sqlx::query("UPDATE polls SET audience_rules = ? WHERE id = ?")
        .bind(rules.to_json())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// All published polls, for the status monitor.
pub async fn published(pool: &SqlitePool) -> Result<Vec<Poll>, StoreError> {
    let rows = sqlx::query("SELECT * FROM polls WHERE status IN ('scheduled', 'active')")
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_poll).collect()
}

/// Active polls, newest first.
pub async fn active(pool: &SqlitePool) -> Result<Vec<Poll>, StoreError> {
    let rows = sqlx::query("SELECT * FROM polls WHERE status = 'active' ORDER BY starts_at DESC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_poll).collect()
}

/// Every poll (startup region-code conversion).
pub async fn all(pool: &SqlitePool) -> Result<Vec<Poll>, StoreError> {
    let rows = sqlx::query("SELECT * FROM polls").fetch_all(pool).await?;
    rows.iter().map(row_to_poll).collect()
}
