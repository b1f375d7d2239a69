//! The error envelope.
//!
//! Every failure leaves the HTTP layer as
//! `{ "error": { code, message, statusCode, details?, retryAfter? } }` with a
//! stable machine-readable code. Lower-layer errors are wrapped here, never
//! leaked raw; internal detail strings are attached only outside prod.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::chain::ChainError;
use crate::enrollment::{BiometricError, EnrollmentError};
use crate::session::attestation::AttestationError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::vote::VoteError;

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Auth(String),
    Forbidden { code: &'static str, message: String },
    NotFound(String),
    Conflict { code: &'static str, message: String },
    RateLimited { retry_after: u64 },
    Upstream { message: String, retryable: bool },
    Fatal(String),
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::Auth(_) => "AUTH",
            ApiError::Forbidden { code, .. } => code,
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict { code, .. } => code,
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Upstream { .. } => "UPSTREAM",
            ApiError::Fatal(_) => "FATAL",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Fatal(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Validation(m)
            | ApiError::Auth(m)
            | ApiError::NotFound(m)
            | ApiError::Fatal(m) => m.clone(),
            ApiError::Forbidden { message, .. } | ApiError::Conflict { message, .. } => {
                message.clone()
            }
            ApiError::RateLimited { .. } => "rate limit exceeded".to_string(),
            ApiError::Upstream { message, .. } => message.clone(),
            ApiError::Internal(_) => "internal error".to_string(),
        }
    }

    pub fn not_eligible() -> Self {
        ApiError::Forbidden {
            code: "NOT_ELIGIBLE",
            message: "voter does not match this poll's audience".to_string(),
        }
    }

    pub fn already_voted() -> Self {
        ApiError::Conflict {
            code: "ALREADY_VOTED",
            message: "a ballot for this poll was already accepted".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut error = json!({
            "code": self.code(),
            "message": self.message(),
            "statusCode": status.as_u16(),
        });
        match &self {
            ApiError::RateLimited { retry_after } => {
                error["retryAfter"] = json!(retry_after);
            }
            ApiError::Upstream { retryable, .. } => {
                error["retryable"] = json!(retryable);
            }
            ApiError::Internal(detail) if cfg!(debug_assertions) => {
                error["details"] = json!(detail);
            }
            _ => {}
        }
        let mut response = (status, Json(json!({ "error": error }))).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            if let Ok(v) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("retry-after", v);
            }
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound("resource not found".into()),
            StoreError::Duplicate => ApiError::Conflict {
                code: "CONFLICT",
                message: "duplicate resource".into(),
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Auth(e.to_string())
    }
}

impl From<AttestationError> for ApiError {
    fn from(e: AttestationError) -> Self {
        ApiError::Auth(e.to_string())
    }
}

impl From<VoteError> for ApiError {
    fn from(e: VoteError) -> Self {
        match e {
            VoteError::ReadOnly => ApiError::Fatal("system is read-only".into()),
            VoteError::PollNotFound => ApiError::NotFound("poll not found".into()),
            VoteError::PollNotActive => ApiError::Validation("poll is not accepting votes".into()),
            VoteError::NotEligible => ApiError::not_eligible(),
            VoteError::UnknownOption => ApiError::Validation("unknown option".into()),
            VoteError::MissingChoice => ApiError::Validation("ballot names no choice".into()),
            VoteError::StaleBucket => ApiError::Validation("timestamp bucket not current".into()),
            VoteError::LegacyRegions => ApiError::Forbidden {
                code: "FORBIDDEN",
                message: "poll awaits region-code migration".into(),
            },
            VoteError::Attestation(e) => e.into(),
            VoteError::AlreadyVoted => ApiError::already_voted(),
            VoteError::Proof(e) => ApiError::Auth(e.to_string()),
            VoteError::Store(e) => e.into(),
        }
    }
}

impl From<EnrollmentError> for ApiError {
    fn from(e: EnrollmentError) -> Self {
        match e {
            EnrollmentError::SessionNotFound => ApiError::NotFound("enrollment session not found".into()),
            EnrollmentError::SessionExpired => ApiError::Validation("enrollment session expired".into()),
            EnrollmentError::AlreadyActive => ApiError::Conflict {
                code: "ALREADY_ENROLLED",
                message: "device already has an active enrollment session".into(),
            },
            EnrollmentError::InvalidState(state) => {
                ApiError::Validation(format!("operation invalid in state {state:?}"))
            }
            EnrollmentError::InvalidDocument(m) => ApiError::Validation(m),
            EnrollmentError::BelowThreshold(what) => ApiError::Validation(format!("{what} below threshold")),
            EnrollmentError::TooManyAttempts => ApiError::Forbidden {
                code: "FORBIDDEN",
                message: "too many failed attempts".into(),
            },
            EnrollmentError::Biometric(e) => e.into(),
            EnrollmentError::Store(e) => e.into(),
        }
    }
}

impl From<BiometricError> for ApiError {
    fn from(e: BiometricError) -> Self {
        let retryable = e.is_retryable() || matches!(e, BiometricError::CircuitOpen);
        ApiError::Upstream {
            message: e.to_string(),
            retryable,
        }
    }
}

impl From<ChainError> for ApiError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Mismatch { seq } => {
                ApiError::Fatal(format!("audit chain integrity violation at entry {seq}"))
            }
            ChainError::NotFound(seq) => ApiError::NotFound(format!("chain entry {seq} not found")),
            ChainError::Store(e) => e.into(),
        }
    }
}
