//! Enrolled users.
//!
//! A user row never holds a plaintext personal number, only its salted keyed
//! hash. Re-enrollment with the same hash updates the row in place; the id
//! is stable across re-enrollments.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::now;
use crate::polls::UserProfile;

use super::StoreError;

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub pn_hash: String,
    pub gender: String,
    pub birth_year: i32,
    pub region_codes: Vec<String>,
    pub device_thumbprint: String,
    pub enrolled_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            gender: self.gender.clone(),
            birth_year: self.birth_year,
            region_codes: self.region_codes.clone(),
        }
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, StoreError> {
    let region_codes: Vec<String> = serde_json::from_str(&row.get::<String, _>("region_codes"))?;
    Ok(User {
        id: row.get("id"),
        pn_hash: row.get("pn_hash"),
        gender: row.get("gender"),
        birth_year: row.get::<i64, _>("birth_year") as i32,
        region_codes,
        device_thumbprint: row.get("device_thumbprint"),
        enrolled_at: row.get("enrolled_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Credential issuance: insert a new user, or on re-enrollment with a known
/// `pn_hash`, refresh the demographics and device thumbprint of the existing
/// row. Returns the stable user.
pub async fn upsert_enrolled(
    pool: &SqlitePool,
    pn_hash: &str,
    gender: &str,
    birth_year: i32,
    region_codes: &[String],
    device_thumbprint: &str,
) -> Result<User, StoreError> {
    let ts = now();
    let regions_json = serde_json::to_string(region_codes).expect("region codes serialize");
    sqlx::query(
        "INSERT INTO users (id, pn_hash, gender, birth_year, region_codes, device_thumbprint, enrolled_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(pn_hash) DO UPDATE SET
            gender = excluded.gender,
            birth_year = excluded.birth_year,
            region_codes = excluded.region_codes,
            device_thumbprint = excluded.device_thumbprint,
            updated_at = excluded.updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(pn_hash)
    .bind(gender)
    .bind(birth_year as i64)
    .bind(&regions_json)
    .bind(device_thumbprint)
    .bind(ts)
    .bind(ts)
    .execute(pool)
    .await?;

    by_pn_hash(pool, pn_hash)
        .await?
        .ok_or(StoreError::NotFound)
}

pub async fn by_id(pool: &SqlitePool, id: &str) -> Result<Option<User>, StoreError> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_user).transpose()
}

pub async fn by_pn_hash(pool: &SqlitePool, pn_hash: &str) -> Result<Option<User>, StoreError> {
    let row = sqlx::query("SELECT * FROM users WHERE pn_hash = ?")
        .bind(pn_hash)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_user).transpose()
}

pub async fn by_device_thumbprint(
    pool: &SqlitePool,
    thumbprint: &str,
) -> Result<Option<User>, StoreError> {
    let row = sqlx::query("SELECT * FROM users WHERE device_thumbprint = ?")
        .bind(thumbprint)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_user).transpose()
}

/// Demographic snapshots of every enrolled user, for audience estimation.
pub async fn all_profiles(pool: &SqlitePool) -> Result<Vec<UserProfile>, StoreError> {
    let rows = sqlx::query("SELECT gender, birth_year, region_codes FROM users")
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| {
            let region_codes: Vec<String> =
                serde_json::from_str(&row.get::<String, _>("region_codes"))?;
            Ok(UserProfile {
                gender: row.get("gender"),
                birth_year: row.get::<i64, _>("birth_year") as i32,
                region_codes,
            })
        })
        .collect()
}

/// Administrative purge: the only way a user row is destroyed.
pub async fn purge(pool: &SqlitePool, id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
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
    async fn test_upsert_creates_user() {
        let pool = pool().await;
        let user = upsert_enrolled(
            &pool,
            "pn-hash-1",
            "F",
            1990,
            &["reg_tbilisi".to_string()],
            "thumb-1",
        )
        .await
        .unwrap();
        assert_eq!(user.pn_hash, "pn-hash-1");
        assert_eq!(user.region_codes, vec!["reg_tbilisi"]);
    }

    #[tokio::test]
    async fn test_reenrollment_updates_in_place() {
        let pool = pool().await;
        let first = upsert_enrolled(&pool, "pn-hash-1", "F", 1990, &[], "thumb-old")
            .await
            .unwrap();
        let second = upsert_enrolled(&pool, "pn-hash-1", "F", 1990, &[], "thumb-new")
            .await
            .unwrap();

        // Same row, new device thumbprint, no duplicate.
        assert_eq!(first.id, second.id);
        assert_eq!(second.device_thumbprint, "thumb-new");
        let profiles = all_profiles(&pool).await.unwrap();
        assert_eq!(profiles.len(), 1);
    }

    #[tokio::test]
    async fn test_purge() {
        let pool = pool().await;
        let user = upsert_enrolled(&pool, "pn-hash-1", "M", 1980, &[], "t")
            .await
            .unwrap();
        assert!(purge(&pool, &user.id).await.unwrap());
        assert!(by_id(&pool, &user.id).await.unwrap().is_none());
        assert!(!purge(&pool, &user.id).await.unwrap());
    }
}
