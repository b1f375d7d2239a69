//! Crypto registry: pluggable keyed hashing and optional nullifier proofs.
//!
//! The pipeline never names an algorithm. Everything that derives a
//! credential, nullifier, or thumbprint goes through [`KeyedHasher`], and the
//! active implementation is chosen once at startup from `CRYPTO_HASHER`.
//! Switching from HMAC-SHA256 to Poseidon requires no call-site change.

pub mod hmac;
pub mod poseidon;
pub mod zk;

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::HasherKind;

pub use hmac::HmacHasher;
pub use poseidon::PoseidonHasher;
pub use zk::{NullifierProofVerifier, ProofError};

/// A keyed hash over an ordered list of string inputs.
///
/// Implementations must be deterministic and collision-resistant, and
/// `verify` must compare in constant time.
pub trait KeyedHasher: Send + Sync {
    /// Hash `inputs` under `key`, returning lowercase hex.
    fn hash(&self, key: &[u8], inputs: &[&str]) -> String;

    /// Constant-time check that `expected_hex` is the hash of `inputs` under
    /// `key`. Malformed hex fails closed.
    fn verify(&self, key: &[u8], expected_hex: &str, inputs: &[&str]) -> bool;

    /// Algorithm label for diagnostics.
    fn name(&self) -> &'static str;
}

/// Process-wide registry holding the active hasher.
///
/// Constructed once at startup and passed through the app context, never
/// reached from module scope.
#[derive(Clone)]
pub struct CryptoRegistry {
    hasher: Arc<dyn KeyedHasher>,
    kind: HasherKind,
}

impl CryptoRegistry {
    pub fn from_kind(kind: HasherKind) -> Self {
        let hasher: Arc<dyn KeyedHasher> = match kind {
            HasherKind::Hmac => Arc::new(HmacHasher),
            HasherKind::Poseidon => Arc::new(PoseidonHasher),
        };
        Self { hasher, kind }
    }

    pub fn kind(&self) -> HasherKind {
        self.kind
    }

    pub fn hasher(&self) -> &dyn KeyedHasher {
        self.hasher.as_ref()
    }

    pub fn hash(&self, key: &[u8], inputs: &[&str]) -> String {
        self.hasher.hash(key, inputs)
    }

    pub fn verify(&self, key: &[u8], expected_hex: &str, inputs: &[&str]) -> bool {
        self.hasher.verify(key, expected_hex, inputs)
    }
}

/// Unkeyed SHA-256 over `'|'`-joined inputs, hex encoded.
///
/// Used where a public, recomputable digest is wanted: audit-chain entries
/// and poll-id hashes for proof public signals.
pub fn sha256_hex(inputs: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, input) in inputs.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(input.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_selects_hmac() {
        let registry = CryptoRegistry::from_kind(HasherKind::Hmac);
        assert_eq!(registry.hasher().name(), "hmac-sha256");
    }

    #[test]
    fn test_registry_selects_poseidon() {
        let registry = CryptoRegistry::from_kind(HasherKind::Poseidon);
        assert_eq!(registry.hasher().name(), "poseidon");
    }

    #[test]
    fn test_hash_verify_round_trip_both_kinds() {
        for kind in [HasherKind::Hmac, HasherKind::Poseidon] {
            let registry = CryptoRegistry::from_kind(kind);
            let key = [7u8; 32];
            let digest = registry.hash(&key, &["poll-1", "voter-secret"]);
            assert!(registry.verify(&key, &digest, &["poll-1", "voter-secret"]));
            assert!(!registry.verify(&key, &digest, &["poll-2", "voter-secret"]));
        }
    }

    #[test]
    fn test_sha256_hex_separator_matters() {
        // "ab" + "c" must not collide with "a" + "bc".
        assert_ne!(sha256_hex(&["ab", "c"]), sha256_hex(&["a", "bc"]));
    }

    #[test]
    fn test_sha256_hex_known_shape() {
        let digest = sha256_hex(&["x"]);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
