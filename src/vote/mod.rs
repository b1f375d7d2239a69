//! Ballot intake pipeline.
//!
//! One entry point, `VotePipeline::cast`, runs the full admission sequence:
//! attestation, eligibility, nullifier derivation, optional proof, and the
//! atomic write of nullifier + vote + chain entry + attestation. Everything
//! that talks to the outside world happens before the transaction begins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::SqlitePool;
use thiserror::Error;

use crate::cache::SharedCache;
use crate::crypto::{sha256_hex, CryptoRegistry, NullifierProofVerifier, ProofError};
use crate::db::now;
use crate::polls::{current_year, PollStatus, PollType};
use crate::session::attestation::{
    attestation_message, verify_and_consume, Attestation, AttestationError, Purpose,
};
use crate::store::polls as poll_store;
use crate::store::rewards;
use crate::store::users::User;
use crate::store::votes::{insert_ballot, AcceptedBallot, BallotRecord};
use crate::store::StoreError;
use crate::tally::birth_bucket;

/// Width of the vote timestamp bucket, in seconds. Coarse on purpose: the
/// chain must not leak precise cast times.
pub const TS_BUCKET_SECS: i64 = 600;

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("system is in read-only mode")]
    ReadOnly,

    #[error("poll not found")]
    PollNotFound,

    #[error("poll is not accepting votes")]
    PollNotActive,

    #[error("voter does not match the poll's audience rules")]
    NotEligible,

    #[error("unknown option for this poll")]
    UnknownOption,

    #[error("ballot is missing a choice")]
    MissingChoice,

    #[error("timestamp bucket is not current")]
    StaleBucket,

    #[error("poll audience rules await region-code migration")]
    LegacyRegions,

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error("duplicate ballot")]
    AlreadyVoted,

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for VoteError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => VoteError::AlreadyVoted,
            other => VoteError::Store(other),
        }
    }
}

/// Client ballot submission.
#[derive(Debug, Clone)]
pub struct VoteRequest {
    pub device_id: String,
    pub option_id: Option<String>,
    pub survey_response: Option<serde_json::Value>,
    pub attestation: Attestation,
    pub ts_bucket: i64,
    /// Optional compressed Groth16 proof bytes.
    pub proof: Option<Vec<u8>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VoteReceipt {
    pub chain_seq: i64,
    pub entry_hash: String,
}

pub fn current_ts_bucket(at: i64) -> i64 {
    at / TS_BUCKET_SECS
}

pub struct VotePipeline {
    pool: SqlitePool,
    registry: CryptoRegistry,
    cache: SharedCache,
    zk: Arc<NullifierProofVerifier>,
    voter_salt: [u8; 32],
    device_salt: [u8; 32],
    read_only: Arc<AtomicBool>,
}

impl VotePipeline {
    pub fn new(
        pool: SqlitePool,
        registry: CryptoRegistry,
        cache: SharedCache,
        zk: Arc<NullifierProofVerifier>,
        voter_salt: [u8; 32],
        device_salt: [u8; 32],
        read_only: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pool,
            registry,
            cache,
            zk,
            voter_salt,
            device_salt,
            read_only,
        }
    }

    /// The per-voter secret. Constant until re-enrollment rotates the device
    /// thumbprint, which keeps nullifiers unlinkable across polls.
    fn voter_secret(&self, user: &User) -> String {
        self.registry
            .hash(&self.voter_salt, &[&user.pn_hash, &user.device_thumbprint])
    }

    /// Deterministic per-(voter, poll) nullifier.
    pub fn nullifier(&self, user: &User, poll_id: &str) -> String {
        let secret = self.voter_secret(user);
        self.registry.hash(secret.as_bytes(), &[poll_id])
    }

    /// Submit a ballot. See module docs for the step order.
    pub async fn cast(
        &self,
        user: &User,
        poll_id: &str,
        request: &VoteRequest,
    ) -> Result<VoteReceipt, VoteError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(VoteError::ReadOnly);
        }

        // 1. The poll must be live.
        let poll = poll_store::get(&self.pool, poll_id)
            .await?
            .ok_or(VoteError::PollNotFound)?;
        let ts = now();
        if poll.status != PollStatus::Active
            || poll.published_at.is_none()
            || ts < poll.starts_at
            || ts >= poll.ends_at
        {
            return Err(VoteError::PollNotActive);
        }
        if poll.audience_rules.has_legacy_region_ids() {
            return Err(VoteError::LegacyRegions);
        }

        // 2. The signed timestamp bucket must be current.
        let bucket = current_ts_bucket(ts);
        if (request.ts_bucket - bucket).abs() > 1 {
            return Err(VoteError::StaleBucket);
        }

        // 3. Attestation against the enrolled device key; consumes the nonce.
        let message = attestation_message(
            &request.attestation.nonce,
            Some(poll_id),
            request.option_id.as_deref(),
            request.ts_bucket,
        );
        verify_and_consume(
            &self.cache,
            &self.registry,
            &self.device_salt,
            &user.device_thumbprint,
            &request.device_id,
            &request.attestation,
            Purpose::Vote,
            &message,
        )?;

        // 4. Eligibility, re-read from the persistent record.
        if !poll.audience_rules.matches(&user.profile(), current_year()) {
            return Err(VoteError::NotEligible);
        }

        // 5. The ballot must name a valid choice.
        match poll.poll_type {
            PollType::Survey => {
                if request.survey_response.is_none() {
                    return Err(VoteError::MissingChoice);
                }
            }
            _ => {
                let option_id = request.option_id.as_deref().ok_or(VoteError::MissingChoice)?;
                if !poll_store::has_option(&self.pool, poll_id, option_id).await? {
                    return Err(VoteError::UnknownOption);
                }
            }
        }

        // 6. Nullifier, and the optional proof over its public signals.
        let nullifier_hash = self.nullifier(user, poll_id);
        if let Some(proof) = &request.proof {
            let poll_id_hash = sha256_hex(&[poll_id]);
            self.zk.verify(proof, &nullifier_hash, &poll_id_hash)?;
        }

        // 7. Atomic write; a duplicate nullifier rolls everything back.
        let record = BallotRecord {
            poll_id: poll_id.to_string(),
            option_id: request.option_id.clone(),
            survey_response: request.survey_response.clone(),
            gender: user.gender.clone(),
            birth_bucket: birth_bucket(user.birth_year),
            region_code: user
                .region_codes
                .first()
                .cloned()
                .unwrap_or_else(|| "none".to_string()),
            ts_bucket: request.ts_bucket,
            nullifier_hash,
            attestation_payload: serde_json::to_string(&request.attestation)
                .expect("attestation serialize"),
            device_thumbprint_hash: sha256_hex(&[&user.device_thumbprint]),
            nonce: request.attestation.nonce.clone(),
        };
        let accepted: AcceptedBallot = insert_ballot(&self.pool, &record).await?;

        // 8. Post-commit, fire-and-forget: participation reward.
        if let Some(amount) = poll.reward_amount {
            let pool = self.pool.clone();
            let user_id = user.id.clone();
            let poll_id = poll_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = rewards::credit(&pool, &user_id, &poll_id, amount).await {
                    tracing::warn!(error = %e, "reward credit failed");
                }
            });
        }

        Ok(VoteReceipt {
            chain_seq: accepted.chain_seq,
            entry_hash: accepted.entry_hash,
        })
    }
}
