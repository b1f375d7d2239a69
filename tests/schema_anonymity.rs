//! Anonymity by schema: the votes table must be structurally unjoinable to
//! voters. No foreign key from `votes` may point at users, sessions, or
//! attestations, and no column may carry user, session, device, ip, or
//! nullifier identifiers.

mod common;

use sqlx::Row;

use common::test_ctx;

#[tokio::test]
async fn votes_has_no_fk_to_identity_tables() {
    let ctx = test_ctx().await;
    let fks = sqlx::query("PRAGMA foreign_key_list(votes)")
        .fetch_all(&ctx.pool)
        .await
        .unwrap();

    for fk in &fks {
        let target: String = fk.get("table");
        assert!(
            !matches!(
                target.as_str(),
                "users" | "enrollment_sessions" | "vote_attestations" | "vote_nullifiers"
            ),
            "votes must not reference {target}"
        );
    }
    // The only allowed reference is the poll itself.
    assert!(fks.iter().all(|fk| fk.get::<String, _>("table") == "polls"));
}

#[tokio::test]
async fn votes_columns_carry_no_identity() {
    let ctx = test_ctx().await;
    let columns = sqlx::query("PRAGMA table_info(votes)")
        .fetch_all(&ctx.pool)
        .await
        .unwrap();

    const FORBIDDEN: &[&str] = &["user", "session", "device", "ip", "nullifier", "pn_hash"];
    for column in &columns {
        let name: String = column.get("name");
        for fragment in FORBIDDEN {
            assert!(
                !name.to_lowercase().contains(fragment),
                "votes.{name} looks like an identity column"
            );
        }
    }
}

#[tokio::test]
async fn attestations_detached_from_every_table() {
    let ctx = test_ctx().await;
    let fks = sqlx::query("PRAGMA foreign_key_list(vote_attestations)")
        .fetch_all(&ctx.pool)
        .await
        .unwrap();
    assert!(
        fks.is_empty(),
        "vote_attestations must not declare foreign keys"
    );
}

#[tokio::test]
async fn nullifiers_carry_only_poll_and_hash() {
    let ctx = test_ctx().await;
    let columns = sqlx::query("PRAGMA table_info(vote_nullifiers)")
        .fetch_all(&ctx.pool)
        .await
        .unwrap();
    let names: Vec<String> = columns.iter().map(|c| c.get("name")).collect();
    assert_eq!(names, vec!["poll_id", "nullifier_hash"]);
}
