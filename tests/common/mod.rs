//! Shared test harness: an in-memory app context, an enrolled device, and
//! helpers for building signed ballots.
#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};

use agora::api::{AppContext, Ctx};
use agora::config::{AppEnv, Config, HasherKind};
use agora::db;
use agora::polls::{AudienceRules, PollStatus, PollType};
use agora::secrets::{KeyMaterial, SecretsProvider, REQUIRED_SECRETS};
use agora::session::attestation::{attestation_message, issue_nonce, Attestation, Purpose};
use agora::session::{issue_token, SessionClaims};
use agora::store::users::{self, User};
use agora::store::polls as poll_store;
use agora::vote::current_ts_bucket;

pub fn test_config() -> Config {
    Config {
        env: AppEnv::Test,
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        vault_addr: None,
        vault_token: None,
        vault_secret_path: "secret/data/agora".to_string(),
        hasher: HasherKind::Hmac,
        zk_verifying_key_path: None,
        min_k_anonymity: 30,
        enable_privacy_noise: false,
        privacy_noise_epsilon: 1.0,
        biometric_service_url: None,
        biometric_timeout: Duration::from_secs(10),
        biometric_max_retries: 1,
        liveness_threshold: 0.8,
        face_match_threshold: 0.7,
        ledger_url: None,
        ledger_timeout: Duration::from_secs(5),
        anchor_every_n: 64,
        anchor_every_secs: 300,
        backend_url: "http://127.0.0.1:3000".to_string(),
        shield_port: 0,
        block_threshold: 100,
        block_ttl_secs: 3600,
        shield_admin_token: None,
    }
}

pub fn test_secrets() -> SecretsProvider {
    let mut values = HashMap::new();
    for name in REQUIRED_SECRETS {
        values.insert(name.to_string(), format!("{name}-test-0123456789abcdef"));
    }
    SecretsProvider::from_values(values)
}

pub async fn test_ctx() -> Ctx {
    let config = test_config();
    let secrets = test_secrets();
    let keys = KeyMaterial::derive(&secrets).unwrap();
    let pool = db::connect_memory().await.unwrap();
    db::migrations::run(&pool).await.unwrap();
    AppContext::assemble(config, secrets, keys, pool).unwrap()
}

/// Context on a file-backed database opened through the production
/// `db::connect` path (multi-connection pool, WAL, busy timeout). Used by
/// the tests that need real writer contention, which the single-connection
/// in-memory pool cannot produce.
pub async fn test_ctx_at(database_url: &str) -> Ctx {
    let mut config = test_config();
    config.database_url = database_url.to_string();
    let secrets = test_secrets();
    let keys = KeyMaterial::derive(&secrets).unwrap();
    let pool = db::connect(database_url).await.unwrap();
    db::migrations::run(&pool).await.unwrap();
    AppContext::assemble(config, secrets, keys, pool).unwrap()
}

/// An enrolled device with its signing key.
pub struct Device {
    pub key_pair: Ed25519KeyPair,
    pub pub_key_b64: String,
    pub device_id: String,
}

pub fn new_device(device_id: &str) -> Device {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
    let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
    let pub_key_b64 = B64.encode(key_pair.public_key().as_ref());
    Device {
        key_pair,
        pub_key_b64,
        device_id: device_id.to_string(),
    }
}

/// Enroll a user bound to `device`, bypassing the HTTP enrollment flow.
pub async fn enroll_user(
    ctx: &Ctx,
    device: &Device,
    pn_hash: &str,
    gender: &str,
    birth_year: i32,
    regions: &[&str],
) -> User {
    let thumbprint = ctx
        .registry
        .hash(&ctx.keys.device_salt, &[&device.pub_key_b64]);
    let regions: Vec<String> = regions.iter().map(|s| s.to_string()).collect();
    users::upsert_enrolled(&ctx.pool, pn_hash, gender, birth_year, &regions, &thumbprint)
        .await
        .unwrap()
}

pub fn bearer_token(ctx: &Ctx, user: &User) -> String {
    let claims = SessionClaims::for_user(&user.id, &user.pn_hash, &user.device_thumbprint);
    issue_token(&ctx.keys.session_signing, &claims)
}

/// Create and activate a referendum with options A/B; returns (poll_id, option_ids).
pub async fn active_referendum(ctx: &Ctx, rules: AudienceRules) -> (String, Vec<String>) {
    let now = db::now();
    let poll = poll_store::create(
        &ctx.pool,
        &poll_store::NewPoll {
            title: "Test referendum".to_string(),
            description: String::new(),
            poll_type: PollType::Referendum,
            starts_at: now - 60,
            ends_at: now + 3600,
            audience_rules: rules,
            min_k: 30,
            reward_amount: None,
            options: vec!["A".to_string(), "B".to_string()],
            questions: vec![],
        },
    )
    .await
    .unwrap();
    poll_store::mark_published(&ctx.pool, &poll.id).await.unwrap();
    poll_store::set_status(&ctx.pool, &poll.id, PollStatus::Active)
        .await
        .unwrap();
    let options = poll_store::options(&ctx.pool, &poll.id).await.unwrap();
    (poll.id, options.into_iter().map(|o| o.id).collect())
}

/// A fresh vote attestation over (nonce, poll, option, current bucket).
pub fn vote_attestation(
    ctx: &Ctx,
    device: &Device,
    poll_id: &str,
    option_id: &str,
) -> (Attestation, i64) {
    let (nonce, _) = issue_nonce(&ctx.cache, &device.device_id, Purpose::Vote);
    let bucket = current_ts_bucket(db::now());
    let message = attestation_message(&nonce, Some(poll_id), Some(option_id), bucket);
    let attestation = Attestation {
        device_pub_key: device.pub_key_b64.clone(),
        signature: B64.encode(device.key_pair.sign(message.as_bytes()).as_ref()),
        nonce,
    };
    (attestation, bucket)
}
