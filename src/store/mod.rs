//! Transactional store modules.
//!
//! Each sub-module owns one table family. Multi-row writes (poll + children,
//! vote + nullifier + chain entry, enrollment commit) always run inside a
//! single transaction.

pub mod apikeys;
pub mod chain;
pub mod enrollment;
pub mod polls;
pub mod regions;
pub mod rewards;
pub mod users;
pub mod votes;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("not found")]
    NotFound,

    #[error("duplicate row")]
    Duplicate,

    #[error("invalid stored data: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}
