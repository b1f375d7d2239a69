//! Regions and the one-time legacy-id conversion.
//!
//! Polls and users reference regions by stable code, never by UUID. Databases
//! migrated from the legacy schema may still hold UUID-valued audience rules;
//! `convert_legacy_rules` rewrites them against the `legacy_region_ids`
//! mapping at startup, before the first vote.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::warn;

use crate::store::polls as poll_store;

use super::StoreError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct Region {
    pub code: String,
    pub name_en: String,
    pub name_ka: String,
    pub parent_code: Option<String>,
}

pub async fn upsert(pool: &SqlitePool, region: &Region) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO regions (code, name_en, name_ka, parent_code) VALUES (?, ?, ?, ?)
         ON CONFLICT(code) DO UPDATE SET
            name_en = excluded.name_en,
            name_ka = excluded.name_ka,
            parent_code = excluded.parent_code",
    )
    .bind(&region.code)
    .bind(&region.name_en)
    .bind(&region.name_ka)
    .bind(&region.parent_code)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Region>, StoreError> {
    let rows = sqlx::query("SELECT * FROM regions ORDER BY code")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| Region {
            code: row.get("code"),
            name_en: row.get("name_en"),
            name_ka: row.get("name_ka"),
            parent_code: row.get("parent_code"),
        })
        .collect())
}

pub async fn exists(pool: &SqlitePool, code: &str) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM regions WHERE code = ?")
        .bind(code)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n") > 0)
}

pub async fn add_legacy_mapping(pool: &SqlitePool, legacy_id: &str, code: &str) -> Result<(), StoreError> {
    sqlx::query("INSERT OR REPLACE INTO legacy_region_ids (legacy_id, code) VALUES (?, ?)")
        .bind(legacy_id)
        .bind(code)
        .execute(pool)
        .await?;
    Ok(())
}

/// Rewrite UUID-valued audience-rule regions to codes.
///
/// Returns `(converted_polls, unconvertible_polls)`. A poll whose rules keep
/// an unmapped UUID stays unpublishable until an operator fixes the mapping.
pub async fn convert_legacy_rules(pool: &SqlitePool) -> Result<(usize, usize), StoreError> {
    let mapping: HashMap<String, String> =
        sqlx::query("SELECT legacy_id, code FROM legacy_region_ids")
            .fetch_all(pool)
            .await?
            .iter()
            .map(|row| (row.get("legacy_id"), row.get("code")))
            .collect();

    let mut converted = 0;
    let mut unconvertible = 0;
    for poll in poll_store::all(pool).await? {
        let legacy = poll.audience_rules.legacy_region_ids();
        if legacy.is_empty() {
            continue;
        }
        let mut rules = poll.audience_rules.clone();
        let mut unmapped = false;
        for id in legacy {
            match mapping.get(id) {
                Some(code) => {
                    rules.regions.remove(&id.to_string());
                    rules.regions.insert(code.clone());
                }
                None => unmapped = true,
            }
        }
        poll_store::update_rules(pool, &poll.id, &rules).await?;
        if unmapped {
            warn!(poll = %poll.id, "audience rules keep unmapped legacy region ids");
            unconvertible += 1;
        } else {
            converted += 1;
        }
    }
    Ok((converted, unconvertible))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_memory, migrations};
    use crate::polls::{AudienceRules, PollType};

    async fn pool() -> SqlitePool {
        let pool = connect_memory().await.unwrap();
        migrations::run(&pool).await.unwrap();
        pool
    }

    fn tbilisi() -> Region {
        Region {
            code: "reg_tbilisi".to_string(),
            name_en: "Tbilisi".to_string(),
            name_ka: "თბილისი".to_string(),
            parent_code: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_list() {
        let pool = pool().await;
        upsert(&pool, &tbilisi()).await.unwrap();
        upsert(&pool, &tbilisi()).await.unwrap(); // idempotent
        assert_eq!(list(&pool).await.unwrap().len(), 1);
        assert!(exists(&pool, "reg_tbilisi").await.unwrap());
        assert!(!exists(&pool, "reg_batumi").await.unwrap());
    }

    #[tokio::test]
    async fn test_legacy_conversion() {
        let pool = pool().await;
        upsert(&pool, &tbilisi()).await.unwrap();
        let legacy_id = "a7c3f8f2-4a1b-4a6e-9a2f-0c1d2e3f4a5b";
        add_legacy_mapping(&pool, legacy_id, "reg_tbilisi").await.unwrap();

        let rules = AudienceRules {
            regions: [legacy_id.to_string()].into_iter().collect(),
            ..Default::default()
        };
        let poll = poll_store::create(
            &pool,
            &poll_store::NewPoll {
                title: "Legacy".to_string(),
                description: String::new(),
                poll_type: PollType::Referendum,
                starts_at: 0,
                ends_at: 100,
                audience_rules: rules,
                min_k: 30,
                reward_amount: None,
                options: vec!["A".to_string(), "B".to_string()],
                questions: vec![],
            },
        )
        .await
        .unwrap();

        let (converted, unconvertible) = convert_legacy_rules(&pool).await.unwrap();
        assert_eq!((converted, unconvertible), (1, 0));

        let poll = poll_store::get(&pool, &poll.id).await.unwrap().unwrap();
        assert!(!poll.audience_rules.has_legacy_region_ids());
        assert!(poll.audience_rules.regions.contains("reg_tbilisi"));

        // Second pass finds nothing left to convert.
        assert_eq!(convert_legacy_rules(&pool).await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_unmapped_legacy_id_flagged() {
        let pool = pool().await;
        let rules = AudienceRules {
            regions: ["ffffffff-0000-0000-0000-000000000000".to_string()]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        poll_store::create(
            &pool,
            &poll_store::NewPoll {
                title: "Orphan".to_string(),
                description: String::new(),
                poll_type: PollType::Referendum,
                starts_at: 0,
                ends_at: 100,
                audience_rules: rules,
                min_k: 30,
                reward_amount: None,
                options: vec!["A".to_string(), "B".to_string()],
                questions: vec![],
            },
        )
        .await
        .unwrap();
        let (converted, unconvertible) = convert_legacy_rules(&pool).await.unwrap();
        assert_eq!((converted, unconvertible), (0, 1));
    }
}
