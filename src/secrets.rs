//! Uniform secret access: vault endpoint when configured, process
//! environment otherwise.
//!
//! Secrets are fetched once at startup and cached; nothing here re-reads the
//! environment or re-contacts the vault afterwards. Purpose-specific key
//! material is derived from the named secrets with HKDF-SHA256 and domain
//! separation, so no raw secret string is ever used directly as a key.

use std::collections::HashMap;

use hkdf::Hkdf;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::{AppEnv, Config};

/// Secrets every deployment must provide.
pub const REQUIRED_SECRETS: &[&str] = &[
    "JWT_SECRET",
    "PN_HASH_SECRET",
    "DEVICE_HASH_SECRET",
    "VOTER_HASH_SECRET",
    "API_KEY_ENCRYPTION_SECRET",
];

/// Recognized optional secrets (required only when the matching subsystem is
/// configured).
const OPTIONAL_SECRETS: &[&str] = &["LEDGER_PRIVATE_KEY"];

/// Minimum secret length outside dev/test.
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("missing required secret: {0}")]
    Missing(String),

    #[error("secret {0} is too short (min {MIN_SECRET_LEN} chars)")]
    TooShort(String),

    #[error("vault request failed: {0}")]
    Vault(String),

    #[error("key derivation failed for {0}")]
    Derivation(String),
}

/// Where the cached secrets came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    Vault,
    Environment,
}

/// Health summary exposed on the admin API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SecretsHealth {
    pub source: &'static str,
    pub secret_count: usize,
}

/// Startup-cached secret store.
pub struct SecretsProvider {
    source: SecretSource,
    values: HashMap<String, String>,
}

impl Drop for SecretsProvider {
    fn drop(&mut self) {
        for (_, v) in self.values.iter_mut() {
            v.zeroize();
        }
    }
}

impl SecretsProvider {
    /// Load secrets from the vault endpoint if one is configured, otherwise
    /// snapshot the recognized names from the process environment.
    pub async fn load(config: &Config) -> Result<Self, SecretsError> {
        match (&config.vault_addr, &config.vault_token) {
            (Some(addr), Some(token)) => {
                Self::load_vault(addr, token, &config.vault_secret_path).await
            }
            _ => Ok(Self::load_env()),
        }
    }

    fn load_env() -> Self {
        let mut values = HashMap::new();
        for name in REQUIRED_SECRETS.iter().chain(OPTIONAL_SECRETS) {
            if let Ok(v) = std::env::var(name) {
                if !v.is_empty() {
                    values.insert(name.to_string(), v);
                }
            }
        }
        Self {
            source: SecretSource::Environment,
            values,
        }
    }

    async fn load_vault(addr: &str, token: &str, path: &str) -> Result<Self, SecretsError> {
        let url = format!("{}/v1/{}", addr.trim_end_matches('/'), path);
        let resp = reqwest::Client::new()
            .get(&url)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(|e| SecretsError::Vault(e.to_string()))?
            .error_for_status()
            .map_err(|e| SecretsError::Vault(e.to_string()))?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| SecretsError::Vault(e.to_string()))?;

        // KV v2 nests the payload under data.data; KV v1 uses data directly.
        let data = body
            .pointer("/data/data")
            .or_else(|| body.pointer("/data"))
            .and_then(Value::as_object)
            .ok_or_else(|| SecretsError::Vault("unexpected vault payload shape".into()))?;

        let mut values = HashMap::new();
        for (k, v) in data {
            if let Some(s) = v.as_str() {
                values.insert(k.clone(), s.to_string());
            }
        }
        Ok(Self {
            source: SecretSource::Vault,
            values,
        })
    }

    /// Build a provider from explicit values (tests).
    pub fn from_values(values: HashMap<String, String>) -> Self {
        Self {
            source: SecretSource::Environment,
            values,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str, SecretsError> {
        self.get(name)
            .ok_or_else(|| SecretsError::Missing(name.to_string()))
    }

    /// Assert all required secrets are present; outside dev/test also assert
    /// minimum length. Called at startup; a failure is fatal (exit 1).
    pub fn validate(&self, env: AppEnv) -> Result<(), SecretsError> {
        for name in REQUIRED_SECRETS {
            let v = self.require(name)?;
            if env.is_prod() && v.len() < MIN_SECRET_LEN {
                return Err(SecretsError::TooShort(name.to_string()));
            }
        }
        Ok(())
    }

    /// Derive a 32-byte purpose key from a named secret.
    ///
    /// HKDF-SHA256 with a versioned domain salt. Same (secret, purpose)
    /// always yields the same key; distinct purposes never collide.
    pub fn derive_key(&self, name: &str, purpose: &[u8]) -> Result<[u8; 32], SecretsError> {
        let secret = self.require(name)?;
        let hk = Hkdf::<Sha256>::new(Some(b"agora-keys-v1"), secret.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(purpose, &mut key)
            .map_err(|_| SecretsError::Derivation(name.to_string()))?;
        Ok(key)
    }

    pub fn health(&self) -> SecretsHealth {
        SecretsHealth {
            source: match self.source {
                SecretSource::Vault => "vault",
                SecretSource::Environment => "environment",
            },
            secret_count: self.values.len(),
        }
    }
}

/// Derived key material used across the pipeline.
///
/// Built once at startup from the secrets provider and shared through the
/// process context; each key has a single purpose.
pub struct KeyMaterial {
    pub session_signing: [u8; 32],
    pub pn_salt: [u8; 32],
    pub device_salt: [u8; 32],
    pub voter_salt: [u8; 32],
    pub api_key_hash: [u8; 32],
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.session_signing.zeroize();
        self.pn_salt.zeroize();
        self.device_salt.zeroize();
        self.voter_salt.zeroize();
        self.api_key_hash.zeroize();
    }
}

impl KeyMaterial {
    pub fn derive(secrets: &SecretsProvider) -> Result<Self, SecretsError> {
        Ok(Self {
            session_signing: secrets.derive_key("JWT_SECRET", b"session-signing")?,
            pn_salt: secrets.derive_key("PN_HASH_SECRET", b"personal-number-hash")?,
            device_salt: secrets.derive_key("DEVICE_HASH_SECRET", b"device-thumbprint")?,
            voter_salt: secrets.derive_key("VOTER_HASH_SECRET", b"voter-secret")?,
            api_key_hash: secrets.derive_key("API_KEY_ENCRYPTION_SECRET", b"api-key-hash")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with_required() -> SecretsProvider {
        let mut values = HashMap::new();
        for name in REQUIRED_SECRETS {
            values.insert(name.to_string(), format!("{name}-0123456789abcdef0123456789"));
        }
        SecretsProvider::from_values(values)
    }

    #[test]
    fn test_require_missing() {
        let provider = SecretsProvider::from_values(HashMap::new());
        assert!(matches!(
            provider.require("JWT_SECRET"),
            Err(SecretsError::Missing(_))
        ));
    }

    #[test]
    fn test_validate_passes_with_required() {
        let provider = provider_with_required();
        assert!(provider.validate(AppEnv::Prod).is_ok());
    }

    #[test]
    fn test_validate_rejects_short_secret_in_prod() {
        let mut values = HashMap::new();
        for name in REQUIRED_SECRETS {
            values.insert(name.to_string(), "short".to_string());
        }
        let provider = SecretsProvider::from_values(values);
        assert!(matches!(
            provider.validate(AppEnv::Prod),
            Err(SecretsError::TooShort(_))
        ));
        // Dev tolerates short secrets.
        assert!(provider.validate(AppEnv::Dev).is_ok());
    }

    #[test]
    fn test_derived_keys_differ_by_purpose() {
        let provider = provider_with_required();
        let a = provider.derive_key("JWT_SECRET", b"purpose-a").unwrap();
        let b = provider.derive_key("JWT_SECRET", b"purpose-b").unwrap();
        assert_ne!(a, b);

        // Deterministic for the same purpose.
        let a2 = provider.derive_key("JWT_SECRET", b"purpose-a").unwrap();
        assert_eq!(a, a2);
    }

    #[test]
    fn test_health_summary() {
        let provider = provider_with_required();
        let health = provider.health();
        assert_eq!(health.source, "environment");
        assert_eq!(health.secret_count, REQUIRED_SECRETS.len());
    }
}
