//! Append-only audit hash chain.
//!
//! Every accepted ballot appends one entry whose hash commits to the
//! previous entry. Entries are never mutated; a recomputation mismatch is a
//! FATAL condition that flips the process into read-only mode.

pub mod anchor;

use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::crypto::sha256_hex;
use crate::store::{chain as chain_store, StoreError};

/// Hash of "nothing before the first entry".
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chain entry {seq} hash mismatch")]
    Mismatch { seq: i64 },

    #[error("chain entry {0} not found")]
    NotFound(i64),
}

/// One chain entry with its linkage fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEntry {
    pub seq: i64,
    pub vote_id: String,
    pub poll_id: String,
    pub option_ref: String,
    pub ts_bucket: i64,
    pub prev_hash: String,
    pub entry_hash: String,
    pub anchor_receipt: Option<String>,
    pub anchored_at: Option<i64>,
}

/// hash_n = H(hash_{n-1} | vote_id | poll_id | option_ref | ts_bucket)
pub fn entry_hash(
    prev_hash: &str,
    vote_id: &str,
    poll_id: &str,
    option_ref: &str,
    ts_bucket: i64,
) -> String {
    sha256_hex(&[prev_hash, vote_id, poll_id, option_ref, &ts_bucket.to_string()])
}

/// Recompute an entry's hash from its stored fields and its predecessor.
pub fn recompute(entry: &ChainEntry) -> String {
    entry_hash(
        &entry.prev_hash,
        &entry.vote_id,
        &entry.poll_id,
        &entry.option_ref,
        entry.ts_bucket,
    )
}

/// Verify a single entry: stored hash matches recomputation and the
/// prev-hash links to the predecessor (or genesis).
pub async fn verify_entry(pool: &SqlitePool, seq: i64) -> Result<ChainEntry, ChainError> {
    let entry = chain_store::entry(pool, seq)
        .await?
        .ok_or(ChainError::NotFound(seq))?;
    let expected_prev = if seq == 1 {
        GENESIS_HASH.to_string()
    } else {
        chain_store::entry(pool, seq - 1)
            .await?
            .ok_or(ChainError::NotFound(seq - 1))?
            .entry_hash
    };
    if entry.prev_hash != expected_prev || recompute(&entry) != entry.entry_hash {
        return Err(ChainError::Mismatch { seq });
    }
    Ok(entry)
}

/// Full-chain recomputation. Returns the number of verified entries.
pub async fn verify_all(pool: &SqlitePool) -> Result<u64, ChainError> {
    let mut prev = GENESIS_HASH.to_string();
    let mut verified = 0u64;
    let mut seq = 1i64;
    while let Some(entry) = chain_store::entry(pool, seq).await? {
        if entry.prev_hash != prev || recompute(&entry) != entry.entry_hash {
            return Err(ChainError::Mismatch { seq });
        }
        prev = entry.entry_hash;
        verified += 1;
        seq += 1;
    }
    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: i64, prev_hash: &str) -> ChainEntry {
        let entry_hash = super::entry_hash(prev_hash, "vote-1", "poll-1", "opt-a", 42);
        ChainEntry {
            seq,
            vote_id: "vote-1".to_string(),
            poll_id: "poll-1".to_string(),
            option_ref: "opt-a".to_string(),
            ts_bucket: 42,
            prev_hash: prev_hash.to_string(),
            entry_hash,
            anchor_receipt: None,
            anchored_at: None,
        }
    }

    #[test]
    fn test_entry_hash_commits_to_all_fields() {
        let base = entry_hash(GENESIS_HASH, "v", "p", "o", 1);
        assert_ne!(base, entry_hash(GENESIS_HASH, "v2", "p", "o", 1));
        assert_ne!(base, entry_hash(GENESIS_HASH, "v", "p2", "o", 1));
        assert_ne!(base, entry_hash(GENESIS_HASH, "v", "p", "o2", 1));
        assert_ne!(base, entry_hash(GENESIS_HASH, "v", "p", "o", 2));
        assert_ne!(base, entry_hash("11", "v", "p", "o", 1));
    }

    #[test]
    fn test_recompute_matches() {
        let e = entry(1, GENESIS_HASH);
        assert_eq!(recompute(&e), e.entry_hash);

        let mut tampered = e.clone();
        tampered.option_ref = "opt-b".to_string();
        assert_ne!(recompute(&tampered), tampered.entry_hash);
    }
}
