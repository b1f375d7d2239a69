//! Poseidon keyed hasher over the BN254 scalar field.
//!
//! The zk-friendly registry entry: a nullifier produced here matches what a
//! circom circuit computes over the same field elements, which is what makes
//! the optional Groth16 nullifier proof possible later.
//!
//! Arbitrary-length inputs are first compressed to field elements by SHA-256
//! truncated to 31 bytes (always below the BN254 modulus), then absorbed as
//! `Poseidon(key_fe, input_fe...)`.

use light_hasher::{Hasher, Poseidon};
use ring::constant_time::verify_slices_are_equal;
use sha2::{Digest, Sha256};

use super::KeyedHasher;

pub struct PoseidonHasher;

/// Map arbitrary bytes to a canonical BN254 field element encoding.
///
/// 32-byte big-endian with a zero leading byte; 31 bytes of entropy keeps the
/// value strictly below the field modulus.
fn field_element(bytes: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(bytes);
    let mut fe = [0u8; 32];
    fe[1..].copy_from_slice(&digest[..31]);
    fe
}

impl KeyedHasher for PoseidonHasher {
    fn hash(&self, key: &[u8], inputs: &[&str]) -> String {
        let mut elements: Vec<[u8; 32]> = Vec::with_capacity(inputs.len() + 1);
        elements.push(field_element(key));
        for input in inputs {
            elements.push(field_element(input.as_bytes()));
        }
        let refs: Vec<&[u8]> = elements.iter().map(|e| e.as_slice()).collect();
        let out = Poseidon::hashv(&refs)
            .expect("poseidon width covers key plus pipeline inputs");
        hex::encode(out)
    }

    fn verify(&self, key: &[u8], expected_hex: &str, inputs: &[&str]) -> bool {
        let expected = match hex::decode(expected_hex) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let actual = match hex::decode(self.hash(key, inputs)) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        verify_slices_are_equal(&expected, &actual).is_ok()
    }

    fn name(&self) -> &'static str {
        "poseidon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism() {
        let h = PoseidonHasher;
        let key = [1u8; 32];
        assert_eq!(h.hash(&key, &["poll-1"]), h.hash(&key, &["poll-1"]));
    }

    #[test]
    fn test_key_isolation() {
        let h = PoseidonHasher;
        assert_ne!(h.hash(&[1u8; 32], &["x"]), h.hash(&[2u8; 32], &["x"]));
    }

    #[test]
    fn test_input_sensitivity() {
        let h = PoseidonHasher;
        let key = [1u8; 32];
        assert_ne!(h.hash(&key, &["a"]), h.hash(&key, &["b"]));
        assert_ne!(h.hash(&key, &["a", "b"]), h.hash(&key, &["a"]));
    }

    #[test]
    fn test_field_element_below_modulus() {
        // Leading byte is forced to zero, so the value is < 2^248 < p.
        let fe = field_element(b"anything at all");
        assert_eq!(fe[0], 0);
        assert_eq!(fe.len(), 32);
    }

    #[test]
    fn test_verify_round_trip() {
        let h = PoseidonHasher;
        let key = [4u8; 32];
        let digest = h.hash(&key, &["poll", "secret"]);
        assert!(h.verify(&key, &digest, &["poll", "secret"]));
        assert!(!h.verify(&key, &digest, &["poll", "wrong"]));
        assert!(!h.verify(&key, "zz", &["poll", "secret"]));
    }
}
