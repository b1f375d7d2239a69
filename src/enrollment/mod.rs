//! Enrollment engine: document capture → liveness → face match → credential.
//!
//! State machine:
//!
//! ```text
//! started → document_ok → liveness_ok → matched → issued
//!    ↘ failed (from any state; retries bounded)
//! ```
//!
//! Issuance persists a salted personal-number hash and a demographic
//! snapshot; the plaintext personal number is zeroized and never stored.

pub mod biometric;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::CryptoRegistry;
use crate::db::now;
use crate::store::enrollment as session_store;
use crate::store::enrollment::EnrollmentSessionRow;
use crate::store::users::{self, User};
use crate::store::StoreError;

pub use biometric::{BiometricEvidence, BiometricError, BiometricVerifier, HttpVerifier, MockVerifier};

/// Bounded retries for failed liveness/match attempts.
pub const MAX_ATTEMPTS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    Started,
    DocumentOk,
    LivenessOk,
    Matched,
    Issued,
    Failed,
}

impl EnrollmentState {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentState::Started => "started",
            EnrollmentState::DocumentOk => "document_ok",
            EnrollmentState::LivenessOk => "liveness_ok",
            EnrollmentState::Matched => "matched",
            EnrollmentState::Issued => "issued",
            EnrollmentState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "started" => Some(EnrollmentState::Started),
            "document_ok" => Some(EnrollmentState::DocumentOk),
            "liveness_ok" => Some(EnrollmentState::LivenessOk),
            "matched" => Some(EnrollmentState::Matched),
            "issued" => Some(EnrollmentState::Issued),
            "failed" => Some(EnrollmentState::Failed),
            _ => None,
        }
    }
}

/// Parsed NFC/MRZ document payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub personal_number: String,
    pub birth_year: i32,
    pub gender: String,
    pub nationality: String,
    #[serde(default)]
    pub region_codes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("enrollment session not found")]
    SessionNotFound,

    #[error("enrollment session expired")]
    SessionExpired,

    #[error("device already has an active enrollment session")]
    AlreadyActive,

    #[error("operation invalid in state {0:?}")]
    InvalidState(EnrollmentState),

    #[error("document payload invalid: {0}")]
    InvalidDocument(String),

    #[error("biometric check below threshold: {0}")]
    BelowThreshold(&'static str),

    #[error("too many failed attempts")]
    TooManyAttempts,

    #[error(transparent)]
    Biometric(#[from] BiometricError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a biometric round.
#[derive(Debug)]
pub enum BiometricOutcome {
    /// Face matched; a credential was issued.
    Issued(User),
    /// The check failed; the session survives for another attempt.
    Retry {
        state: EnrollmentState,
        attempts_left: i64,
    },
    /// Attempt budget exhausted; session is failed.
    Failed,
}

/// The enrollment engine. Holds thresholds and the external verifier; all
/// durable state lives in `enrollment_sessions` / `users`.
pub struct EnrollmentEngine {
    pool: SqlitePool,
    registry: CryptoRegistry,
    verifier: Arc<dyn BiometricVerifier>,
    pn_salt: [u8; 32],
    device_salt: [u8; 32],
    liveness_threshold: f64,
    face_match_threshold: f64,
}

impl EnrollmentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        registry: CryptoRegistry,
        verifier: Arc<dyn BiometricVerifier>,
        pn_salt: [u8; 32],
        device_salt: [u8; 32],
        liveness_threshold: f64,
        face_match_threshold: f64,
    ) -> Self {
        Self {
            pool,
            registry,
            verifier,
            pn_salt,
            device_salt,
            liveness_threshold,
            face_match_threshold,
        }
    }

    /// Open a session for a device.
    pub async fn start(&self, device_id: &str) -> Result<EnrollmentSessionRow, EnrollmentError> {
        match session_store::create(&self.pool, device_id).await {
            Ok(session) => Ok(session),
            Err(StoreError::Sqlx(e))
                if e.as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false) =>
            {
                Err(EnrollmentError::AlreadyActive)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn live_session(&self, session_id: &str) -> Result<EnrollmentSessionRow, EnrollmentError> {
        let session = session_store::get(&self.pool, session_id)
            .await?
            .ok_or(EnrollmentError::SessionNotFound)?;
        if session.expired(now()) {
            return Err(EnrollmentError::SessionExpired);
        }
        Ok(session)
    }

    /// `started → document_ok`: parse and stash the document payload.
    pub async fn submit_document(
        &self,
        session_id: &str,
        payload: &serde_json::Value,
    ) -> Result<EnrollmentSessionRow, EnrollmentError> {
        let session = self.live_session(session_id).await?;
        if session.state != EnrollmentState::Started {
            return Err(EnrollmentError::InvalidState(session.state));
        }
        let document: DocumentPayload = serde_json::from_value(payload.clone())
            .map_err(|e| EnrollmentError::InvalidDocument(e.to_string()))?;
        if document.personal_number.is_empty() {
            return Err(EnrollmentError::InvalidDocument("empty personal number".into()));
        }
        if !(1900..=2100).contains(&document.birth_year) {
            return Err(EnrollmentError::InvalidDocument("implausible birth year".into()));
        }
        let stored = serde_json::to_string(&document).expect("document serialize");
        session_store::save_document(&self.pool, session_id, &stored).await?;
        self.live_session(session_id).await
    }

    /// Run the biometric round: liveness then face match, then issuance.
    ///
    /// `device_pub_key` binds the credential to the enrolling device.
    pub async fn verify_biometrics(
        &self,
        session_id: &str,
        evidence: BiometricEvidence,
        device_pub_key: &str,
    ) -> Result<BiometricOutcome, EnrollmentError> {
        let session = self.live_session(session_id).await?;
        if !matches!(
            session.state,
            EnrollmentState::DocumentOk | EnrollmentState::LivenessOk
        ) {
            return Err(EnrollmentError::InvalidState(session.state));
        }

        // External verifier call happens before any write.
        let scores = self.verifier.verify(session_id, &evidence).await?;

        if scores.liveness_score < self.liveness_threshold {
            return self.record_failure(&session, session.state).await;
        }
        if scores.face_match_score < self.face_match_threshold {
            session_store::save_scores(
                &self.pool,
                session_id,
                scores.liveness_score,
                scores.face_match_score,
                EnrollmentState::LivenessOk,
            )
            .await?;
            return self.record_failure(&session, EnrollmentState::LivenessOk).await;
        }

        session_store::save_scores(
            &self.pool,
            session_id,
            scores.liveness_score,
            scores.face_match_score,
            EnrollmentState::Matched,
        )
        .await?;

        let user = self.issue(session_id, device_pub_key).await?;
        Ok(BiometricOutcome::Issued(user))
    }

    async fn record_failure(
        &self,
        session: &EnrollmentSessionRow,
        keep_state: EnrollmentState,
    ) -> Result<BiometricOutcome, EnrollmentError> {
        let attempts = session_store::bump_attempts(&self.pool, &session.id).await?;
        if attempts >= MAX_ATTEMPTS {
            session_store::set_state(&self.pool, &session.id, EnrollmentState::Failed).await?;
            return Ok(BiometricOutcome::Failed);
        }
        Ok(BiometricOutcome::Retry {
            state: keep_state,
            attempts_left: MAX_ATTEMPTS - attempts,
        })
    }

    /// `matched → issued`: persist (or refresh) the user.
    async fn issue(&self, session_id: &str, device_pub_key: &str) -> Result<User, EnrollmentError> {
        let session = self.live_session(session_id).await?;
        if session.state != EnrollmentState::Matched {
            return Err(EnrollmentError::InvalidState(session.state));
        }
        let raw_doc = session
            .document
            .ok_or_else(|| EnrollmentError::InvalidDocument("session has no document".into()))?;
        let mut document: DocumentPayload = serde_json::from_str(&raw_doc)
            .map_err(|e| EnrollmentError::InvalidDocument(e.to_string()))?;

        let pn_hash = self
            .registry
            .hash(&self.pn_salt, &[&document.personal_number]);
        let thumbprint = self.registry.hash(&self.device_salt, &[device_pub_key]);
        document.personal_number.zeroize();

        let user = users::upsert_enrolled(
            &self.pool,
            &pn_hash,
            &document.gender,
            document.birth_year,
            &document.region_codes,
            &thumbprint,
        )
        .await?;
        session_store::set_state(&self.pool, session_id, EnrollmentState::Issued).await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HasherKind;
    use crate::db::{connect_memory, migrations};

    async fn engine() -> EnrollmentEngine {
        let pool = connect_memory().await.unwrap();
        migrations::run(&pool).await.unwrap();
        EnrollmentEngine::new(
            pool,
            CryptoRegistry::from_kind(HasherKind::Hmac),
            Arc::new(MockVerifier),
            [1u8; 32],
            [2u8; 32],
            0.8,
            0.7,
        )
    }

    fn document() -> serde_json::Value {
        serde_json::json!({
            "personal_number": "01001012345",
            "birth_year": 1990,
            "gender": "F",
            "nationality": "GE",
            "region_codes": ["reg_tbilisi"]
        })
    }

    fn good_evidence() -> BiometricEvidence {
        BiometricEvidence {
            liveness_score: 0.95,
            face_match_score: 0.85,
        }
    }

    #[tokio::test]
    async fn test_full_flow_issues_credential() {
        let engine = engine().await;
        let session = engine.start("device-1").await.unwrap();
        engine.submit_document(&session.id, &document()).await.unwrap();
        let outcome = engine
            .verify_biometrics(&session.id, good_evidence(), "device-pub-key")
            .await
            .unwrap();
        let user = match outcome {
            BiometricOutcome::Issued(user) => user,
            other => panic!("expected issuance, got {other:?}"),
        };
        assert_eq!(user.gender, "F");
        assert_eq!(user.birth_year, 1990);
        // pn hash, never the plaintext number
        assert_ne!(user.pn_hash, "01001012345");

        let session = session_store::get(&engine.pool, &session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state, EnrollmentState::Issued);
    }

    #[tokio::test]
    async fn test_document_required_before_biometrics() {
        let engine = engine().await;
        let session = engine.start("device-1").await.unwrap();
        let err = engine
            .verify_biometrics(&session.id, good_evidence(), "pk")
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::InvalidState(EnrollmentState::Started)));
    }

    #[tokio::test]
    async fn test_low_liveness_is_retryable() {
        let engine = engine().await;
        let session = engine.start("device-1").await.unwrap();
        engine.submit_document(&session.id, &document()).await.unwrap();
        let outcome = engine
            .verify_biometrics(
                &session.id,
                BiometricEvidence {
                    liveness_score: 0.5,
                    face_match_score: 0.9,
                },
                "pk",
            )
            .await
            .unwrap();
        match outcome {
            BiometricOutcome::Retry { attempts_left, .. } => {
                assert_eq!(attempts_left, MAX_ATTEMPTS - 1)
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attempts_bounded() {
        let engine = engine().await;
        let session = engine.start("device-1").await.unwrap();
        engine.submit_document(&session.id, &document()).await.unwrap();
        let bad = BiometricEvidence {
            liveness_score: 0.1,
            face_match_score: 0.1,
        };
        for _ in 0..MAX_ATTEMPTS - 1 {
            let outcome = engine
                .verify_biometrics(&session.id, bad, "pk")
                .await
                .unwrap();
            assert!(matches!(outcome, BiometricOutcome::Retry { .. }));
        }
        let outcome = engine.verify_biometrics(&session.id, bad, "pk").await.unwrap();
        assert!(matches!(outcome, BiometricOutcome::Failed));

        let session = session_store::get(&engine.pool, &session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state, EnrollmentState::Failed);
    }

    #[tokio::test]
    async fn test_reenrollment_same_pn_updates_user() {
        let engine = engine().await;

        let s1 = engine.start("device-old").await.unwrap();
        engine.submit_document(&s1.id, &document()).await.unwrap();
        let BiometricOutcome::Issued(first) = engine
            .verify_biometrics(&s1.id, good_evidence(), "old-key")
            .await
            .unwrap()
        else {
            panic!("expected issuance");
        };

        let s2 = engine.start("device-new").await.unwrap();
        engine.submit_document(&s2.id, &document()).await.unwrap();
        let BiometricOutcome::Issued(second) = engine
            .verify_biometrics(&s2.id, good_evidence(), "new-key")
            .await
            .unwrap()
        else {
            panic!("expected issuance");
        };

        assert_eq!(first.id, second.id);
        assert_ne!(first.device_thumbprint, second.device_thumbprint);
    }

    #[tokio::test]
    async fn test_rejects_bad_document() {
        let engine = engine().await;
        let session = engine.start("device-1").await.unwrap();
        let err = engine
            .submit_document(&session.id, &serde_json::json!({"birth_year": 1990}))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_second_session_same_device_rejected() {
        let engine = engine().await;
        engine.start("device-1").await.unwrap();
        assert!(matches!(
            engine.start("device-1").await.unwrap_err(),
            EnrollmentError::AlreadyActive
        ));
    }
}
