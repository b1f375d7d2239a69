//! Opaque biometric verifier client.
//!
//! Model inference lives in an external service; this side only submits
//! evidence and reads back scores. Calls are deadline-bounded (10 s verify,
//! 3 s health), retried at most once with jittered backoff, and guarded by
//! the per-service circuit breaker.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::CircuitBreaker;

pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum BiometricError {
    #[error("verifier unavailable: {0}")]
    Unavailable(String),

    #[error("verifier rejected request: {0}")]
    Rejected(String),

    #[error("verifier circuit open")]
    CircuitOpen,
}

impl BiometricError {
    /// Transient errors may be retried; rejections may not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BiometricError::Unavailable(_))
    }
}

/// Scores attached to an enrollment attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BiometricEvidence {
    pub liveness_score: f64,
    pub face_match_score: f64,
}

#[async_trait]
pub trait BiometricVerifier: Send + Sync {
    /// Submit evidence for a session; returns the verifier's own scores.
    async fn verify(
        &self,
        session_id: &str,
        evidence: &BiometricEvidence,
    ) -> Result<BiometricEvidence, BiometricError>;

    async fn health(&self) -> Result<(), BiometricError>;
}

/// HTTP implementation against `BIOMETRIC_SERVICE_URL`.
pub struct HttpVerifier {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    breaker: CircuitBreaker,
}

impl HttpVerifier {
    pub fn new(base_url: String, timeout: Duration, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client build"),
            base_url,
            max_retries,
            breaker: CircuitBreaker::new("biometric"),
        }
    }

    async fn post_verify(
        &self,
        session_id: &str,
        evidence: &BiometricEvidence,
    ) -> Result<BiometricEvidence, BiometricError> {
        let url = format!("{}/verify", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "sessionId": session_id,
                "livenessScore": evidence.liveness_score,
                "faceMatchScore": evidence.face_match_score,
            }))
            .send()
            .await
            .map_err(|e| BiometricError::Unavailable(e.to_string()))?;

        if resp.status().is_client_error() {
            return Err(BiometricError::Rejected(resp.status().to_string()));
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| BiometricError::Unavailable(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| BiometricError::Unavailable(format!("bad verifier payload: {e}")))
    }
}

#[async_trait]
impl BiometricVerifier for HttpVerifier {
    async fn verify(
        &self,
        session_id: &str,
        evidence: &BiometricEvidence,
    ) -> Result<BiometricEvidence, BiometricError> {
        if !self.breaker.allow() {
            return Err(BiometricError::CircuitOpen);
        }
        let result = retry_with_backoff(self.max_retries, || {
            self.post_verify(session_id, evidence)
        })
        .await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.is_retryable() => self.breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    async fn health(&self) -> Result<(), BiometricError> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        self.client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| BiometricError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| BiometricError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

/// Dev/test verifier: echoes the submitted scores.
pub struct MockVerifier;

#[async_trait]
impl BiometricVerifier for MockVerifier {
    async fn verify(
        &self,
        _session_id: &str,
        evidence: &BiometricEvidence,
    ) -> Result<BiometricEvidence, BiometricError> {
        Ok(*evidence)
    }

    async fn health(&self) -> Result<(), BiometricError> {
        Ok(())
    }
}

/// Retry a transient failure up to `max_retries` extra attempts, backing off
/// 2^n * 250ms plus up to 250ms of jitter between attempts.
async fn retry_with_backoff<F, Fut, T>(max_retries: u32, mut operation: F) -> Result<T, BiometricError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BiometricError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() || attempt >= max_retries {
                    return Err(err);
                }
                let base_ms = 250u64 * 2u64.pow(attempt);
                let jitter_ms = rand::thread_rng().gen_range(0..250);
                tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
                attempt += 1;
            }
        }
    }
}
