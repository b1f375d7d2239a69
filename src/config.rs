//! Environment-driven configuration.
//!
//! All runtime knobs come from the process environment (a `.env` file is
//! honored in development via `dotenvy`). Secrets themselves are read through
//! the secrets provider, not here; this module only records *where* to find
//! them (vault address, token, path).

use std::time::Duration;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Dev,
    Test,
    Prod,
}

impl AppEnv {
    fn parse(raw: &str) -> Self {
        match raw {
            "prod" | "production" => AppEnv::Prod,
            "test" => AppEnv::Test,
            _ => AppEnv::Dev,
        }
    }

    pub fn is_prod(self) -> bool {
        self == AppEnv::Prod
    }
}

/// Active keyed-hash algorithm for the crypto registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasherKind {
    Hmac,
    Poseidon,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub env: AppEnv,
    pub port: u16,
    pub database_url: String,

    // Vault (optional; falls back to process env)
    pub vault_addr: Option<String>,
    pub vault_token: Option<String>,
    pub vault_secret_path: String,

    // Crypto
    pub hasher: HasherKind,
    pub zk_verifying_key_path: Option<String>,

    // Privacy
    pub min_k_anonymity: u32,
    pub enable_privacy_noise: bool,
    pub privacy_noise_epsilon: f64,

    // Biometric verifier
    pub biometric_service_url: Option<String>,
    pub biometric_timeout: Duration,
    pub biometric_max_retries: u32,
    pub liveness_threshold: f64,
    pub face_match_threshold: f64,

    // Ledger anchoring
    pub ledger_url: Option<String>,
    pub ledger_timeout: Duration,
    pub anchor_every_n: u64,
    pub anchor_every_secs: u64,

    // Shield (edge proxy)
    pub backend_url: String,
    pub shield_port: u16,
    pub block_threshold: i64,
    pub block_ttl_secs: u64,
    pub shield_admin_token: Option<String>,
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// Unset keys fall back to documented defaults; malformed numeric values
    /// are treated as unset rather than aborting startup.
    pub fn from_env() -> Self {
        let env = AppEnv::parse(&var_or("APP_ENV", "dev"));
        Self {
            env,
            port: parse_or("PORT", 3000),
            database_url: var_or("DATABASE_URL", "sqlite://agora.db?mode=rwc"),

            vault_addr: var_opt("VAULT_ADDR"),
            vault_token: var_opt("VAULT_TOKEN"),
            vault_secret_path: var_or("VAULT_SECRET_PATH", "secret/data/agora"),

            hasher: match var_or("CRYPTO_HASHER", "hmac").as_str() {
                "poseidon" => HasherKind::Poseidon,
                _ => HasherKind::Hmac,
            },
            zk_verifying_key_path: var_opt("ZK_VERIFYING_KEY_PATH"),

            min_k_anonymity: parse_or("MIN_K_ANONYMITY", 30),
            enable_privacy_noise: var_or("ENABLE_PRIVACY_NOISE", "true") != "false",
            privacy_noise_epsilon: parse_or("PRIVACY_NOISE_EPSILON", 1.0),

            biometric_service_url: var_opt("BIOMETRIC_SERVICE_URL"),
            biometric_timeout: Duration::from_millis(parse_or("BIOMETRIC_TIMEOUT_MS", 10_000)),
            biometric_max_retries: parse_or("BIOMETRIC_MAX_RETRIES", 1),
            liveness_threshold: parse_or("LIVENESS_THRESHOLD", 0.8),
            face_match_threshold: parse_or("FACE_MATCH_THRESHOLD", 0.7),

            ledger_url: var_opt("LEDGER_URL"),
            ledger_timeout: Duration::from_millis(parse_or("LEDGER_TIMEOUT_MS", 5_000)),
            anchor_every_n: parse_or("ANCHOR_EVERY_N", 64),
            anchor_every_secs: parse_or("ANCHOR_EVERY_SECS", 300),

            backend_url: var_or("BACKEND_URL", "http://127.0.0.1:3000"),
            shield_port: parse_or("SHIELD_PORT", 8080),
            block_threshold: parse_or("BLOCK_THRESHOLD", 100),
            block_ttl_secs: parse_or("BLOCK_TTL_SECS", 3600),
            shield_admin_token: var_opt("SHIELD_ADMIN_TOKEN"),
        }
    }
}

fn var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var_opt(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    var_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
