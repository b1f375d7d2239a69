//! Versioned migrations with an applied-version ledger.
//!
//! Migrations are embedded at compile time and applied in order, each inside
//! its own transaction, and recorded in `schema_migrations`. A database that
//! predates the ledger (tables exist, ledger empty) is detected and its
//! versions are back-filled instead of re-running DDL against live tables.
//! Running the migrator twice leaves schema and data unchanged.

use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use super::{now, DbError};

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "001_init.sql", include_str!("../../migrations/001_init.sql")),
    (2, "002_polls.sql", include_str!("../../migrations/002_polls.sql")),
    (3, "003_votes.sql", include_str!("../../migrations/003_votes.sql")),
    (
        4,
        "004_region_codes.sql",
        include_str!("../../migrations/004_region_codes.sql"),
    ),
];

/// Columns whose absence after migration is a fatal startup condition.
const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("users", "pn_hash"),
    ("votes", "birth_bucket"),
    ("vote_nullifiers", "nullifier_hash"),
    ("audit_chain_entries", "entry_hash"),
];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<String>,
    pub skipped: usize,
    pub preinitialized: bool,
}

/// Apply all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<MigrationReport, DbError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            filename TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let mut report = MigrationReport::default();

    if detect_preinitialized(pool).await? {
        warn!("pre-initialized database detected; back-filling migration ledger");
        for (version, filename, _) in MIGRATIONS {
            record(pool, *version, filename).await?;
        }
        report.preinitialized = true;
        report.skipped = MIGRATIONS.len();
        return Ok(report);
    }

    let applied: Vec<i64> = sqlx::query("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.get::<i64, _>("version"))
        .collect();

    for (version, filename, sql) in MIGRATIONS {
        if applied.contains(version) {
            report.skipped += 1;
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(filename.to_string(), e.to_string()))?;
        sqlx::query(
            "INSERT INTO schema_migrations (version, filename, applied_at) VALUES (?, ?, ?)",
        )
        .bind(version)
        .bind(filename)
        .bind(now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(migration = filename, "applied");
        report.applied.push(filename.to_string());
    }

    Ok(report)
}

/// A database created before the migration ledger existed: core tables are
/// present but nothing is recorded.
async fn detect_preinitialized(pool: &SqlitePool) -> Result<bool, DbError> {
    let ledger_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM schema_migrations")
        .fetch_one(pool)
        .await?
        .get("n");
    if ledger_count > 0 {
        return Ok(false);
    }
    let votes_table: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = 'votes'",
    )
    .fetch_one(pool)
    .await?
    .get("n");
    Ok(votes_table > 0)
}

async fn record(pool: &SqlitePool, version: i64, filename: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT OR IGNORE INTO schema_migrations (version, filename, applied_at) VALUES (?, ?, ?)",
    )
    .bind(version)
    .bind(filename)
    .bind(now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Verify the columns the pipeline cannot run without. Missing ⇒ fatal.
pub async fn verify_required_schema(pool: &SqlitePool) -> Result<(), DbError> {
    for (table, column) in REQUIRED_COLUMNS {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(pool)
            .await?;
        let found = rows
            .iter()
            .any(|row| row.get::<String, _>("name") == *column);
        if !found {
            return Err(DbError::MissingColumn(format!("{table}.{column}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let pool = connect_memory().await.unwrap();
        let first = run(&pool).await.unwrap();
        assert_eq!(first.applied.len(), MIGRATIONS.len());
        assert!(!first.preinitialized);

        // Second run is a no-op.
        let second = run(&pool).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_required_schema_present_after_migration() {
        let pool = connect_memory().await.unwrap();
        run(&pool).await.unwrap();
        verify_required_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_preinitialized_detection() {
        let pool = connect_memory().await.unwrap();
        // Simulate a database created outside the migrator.
        for (_, _, sql) in MIGRATIONS {
            sqlx::raw_sql(sql).execute(&pool).await.unwrap();
        }
        let report = run(&pool).await.unwrap();
        assert!(report.preinitialized);
        assert!(report.applied.is_empty());

        // Ledger is back-filled; a further run is an ordinary no-op.
        let again = run(&pool).await.unwrap();
        assert!(!again.preinitialized);
        assert_eq!(again.skipped, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_missing_required_column_detected() {
        let pool = connect_memory().await.unwrap();
        run(&pool).await.unwrap();
        sqlx::raw_sql("ALTER TABLE votes RENAME COLUMN birth_bucket TO bb")
            .execute(&pool)
            .await
            .unwrap();
        assert!(matches!(
            verify_required_schema(&pool).await,
            Err(DbError::MissingColumn(_))
        ));
    }
}
