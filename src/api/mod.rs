//! HTTP API: process context, router, and middleware.
//!
//! `AppContext` is the explicit process-wide state - config, pools, crypto
//! registry, engines - initialized once at startup and passed through axum
//! state. Nothing is reached from module scope.

pub mod admin;
pub mod analytics;
pub mod auth;
pub mod enrollment;
pub mod error;
pub mod polls;
pub mod public;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cache::SharedCache;
use crate::config::Config;
use crate::crypto::{CryptoRegistry, NullifierProofVerifier, ProofError};
use crate::db::{self, DbError};
use crate::enrollment::{EnrollmentEngine, HttpVerifier, MockVerifier};
use crate::ratelimit::{self, RateLimiter};
use crate::secrets::{KeyMaterial, SecretsError, SecretsProvider};
use crate::session::verify_token;
use crate::store::users::{self, User};
use crate::store::{apikeys, regions, StoreError};
use crate::vote::VotePipeline;

use error::ApiError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Proof(#[from] ProofError),
}

/// Process-wide state.
pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub cache: SharedCache,
    pub registry: CryptoRegistry,
    pub keys: KeyMaterial,
    pub secrets: SecretsProvider,
    pub enrollment: EnrollmentEngine,
    pub pipeline: VotePipeline,
    pub limiter: RateLimiter,
    pub read_only: Arc<AtomicBool>,
}

pub type Ctx = Arc<AppContext>;

impl AppContext {
    /// Connect, migrate, run the legacy region conversion, and wire every
    /// engine together. Any error here is fatal (exit code 1).
    pub async fn initialize(config: Config, secrets: SecretsProvider) -> Result<Ctx, StartupError> {
        secrets.validate(config.env)?;
        let keys = KeyMaterial::derive(&secrets)?;

        let pool = db::connect(&config.database_url).await?;
        let report = db::migrations::run(&pool).await?;
        if !report.applied.is_empty() {
            info!(applied = report.applied.len(), "migrations applied");
        }
        db::migrations::verify_required_schema(&pool).await?;

        let (converted, unconvertible) = regions::convert_legacy_rules(&pool).await?;
        if converted + unconvertible > 0 {
            info!(converted, unconvertible, "legacy region rules processed");
        }

        Self::assemble(config, secrets, keys, pool)
    }

    /// Wire the context from already-prepared parts (used by tests with an
    /// in-memory pool).
    pub fn assemble(
        config: Config,
        secrets: SecretsProvider,
        keys: KeyMaterial,
        pool: SqlitePool,
    ) -> Result<Ctx, StartupError> {
        let cache = SharedCache::new();
        let registry = CryptoRegistry::from_kind(config.hasher);
        let zk = Arc::new(NullifierProofVerifier::from_config(
            config.zk_verifying_key_path.as_deref(),
            config.env,
        )?);
        let read_only = Arc::new(AtomicBool::new(false));

        let verifier: Arc<dyn crate::enrollment::BiometricVerifier> =
            match &config.biometric_service_url {
                Some(url) => Arc::new(HttpVerifier::new(
                    url.clone(),
                    config.biometric_timeout,
                    config.biometric_max_retries,
                )),
                None => {
                    if config.env.is_prod() {
                        warn!("no biometric service configured in prod; using mock verifier");
                    }
                    Arc::new(MockVerifier)
                }
            };

        let enrollment = EnrollmentEngine::new(
            pool.clone(),
            registry.clone(),
            verifier,
            keys.pn_salt,
            keys.device_salt,
            config.liveness_threshold,
            config.face_match_threshold,
        );
        let pipeline = VotePipeline::new(
            pool.clone(),
            registry.clone(),
            cache.clone(),
            zk,
            keys.voter_salt,
            keys.device_salt,
            read_only.clone(),
        );
        let limiter = RateLimiter::new(cache.clone());

        Ok(Arc::new(Self {
            config,
            pool,
            cache,
            registry,
            keys,
            secrets,
            enrollment,
            pipeline,
            limiter,
            read_only,
        }))
    }
}

/// The authenticated user, inserted by the auth middleware.
#[derive(Clone)]
pub struct CurrentUser(pub User);

async fn auth_middleware(
    State(ctx): State<Ctx>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Auth("missing bearer token".into()))?;

    let claims = verify_token(&ctx.keys.session_signing, token)?;
    let user = users::by_id(&ctx.pool, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::Auth("unknown user".into()))?;

    // Re-enrollment rotates the thumbprint; tokens bound to the old device
    // die with it.
    if user.device_thumbprint != claims.thumb {
        return Err(ApiError::Auth("session bound to a retired device key".into()));
    }

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

async fn admin_auth_middleware(
    State(ctx): State<Ctx>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Auth("missing api key".into()))?;
    let key_hash = ctx.registry.hash(&ctx.keys.api_key_hash, &[key]);
    if !apikeys::is_valid(&ctx.pool, &key_hash).await? {
        return Err(ApiError::Auth("invalid api key".into()));
    }
    Ok(next.run(req).await)
}

fn client_ip(req: &Request<Body>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limit_middleware(
    State(ctx): State<Ctx>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    // This layer sits inside the /api/v1 nest, so the prefix is already
    // stripped from the URI it sees.
    let path = req.uri().path();
    // Admin paths are exempt from global limits.
    if !path.starts_with("/admin") {
        let policy = if path.starts_with("/auth") {
            &ratelimit::LOGIN
        } else if path.starts_with("/enrollment") {
            &ratelimit::ENROLLMENT
        } else if path.ends_with("/vote") {
            &ratelimit::VOTE
        } else {
            &ratelimit::DEFAULT
        };
        let ip = client_ip(&req);
        if let Err(retry) = ctx.limiter.check(policy, &ip) {
            return Err(ApiError::RateLimited {
                retry_after: retry.seconds,
            });
        }
    }
    Ok(next.run(req).await)
}

/// Assemble the full application router.
pub fn router(ctx: Ctx) -> Router {
    let open = Router::new()
        .route("/auth/challenge", post(auth::challenge))
        .route("/auth/login", post(auth::login))
        .route("/enrollment/start", post(enrollment::start))
        .route("/enrollment/document", post(enrollment::document))
        .route(
            "/enrollment/verify-biometrics",
            post(enrollment::verify_biometrics),
        );

    let protected = Router::new()
        .route("/polls", get(polls::list))
        .route("/polls/:id", get(polls::get_poll))
        .route("/polls/:id/vote", post(polls::vote))
        .route("/analytics/polls/:id/results", get(analytics::results))
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    let admin = Router::new()
        .route("/admin/polls", post(admin::create_poll))
        .route(
            "/admin/polls/:id",
            put(admin::update_poll).delete(admin::delete_poll),
        )
        .route("/admin/polls/:id/publish", post(admin::publish_poll))
        .route("/admin/regions", post(admin::upsert_region))
        .route("/admin/regions/legacy", post(admin::add_legacy_mapping))
        .route("/admin/secrets/health", get(admin::secrets_health))
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            admin_auth_middleware,
        ));

    let api_v1 = Router::new()
        .merge(open)
        .merge(protected)
        .merge(admin)
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .nest("/api/v1", api_v1)
        .route("/health", get(public::health))
        .route("/public/chain/head", get(public::chain_head))
        .route("/public/chain/:n", get(public::chain_entry))
        .route("/public/polls/:id/results", get(public::results))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
