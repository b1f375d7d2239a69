//! HMAC-SHA256 keyed hasher.
//!
//! The default registry entry. Inputs are joined with `'|'` before MACing, so
//! the same separator discipline applies to every derived value in the
//! system (credentials, nullifiers, thumbprints).

use ring::constant_time::verify_slices_are_equal;
use ring::hmac;

use super::KeyedHasher;

pub struct HmacHasher;

impl KeyedHasher for HmacHasher {
    fn hash(&self, key: &[u8], inputs: &[&str]) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        let message = inputs.join("|");
        let tag = hmac::sign(&key, message.as_bytes());
        hex::encode(tag.as_ref())
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
        "hmac-sha256"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_determinism() {
        let h = HmacHasher;
        let key = [1u8; 32];
        assert_eq!(
            h.hash(&key, &["a", "b"]),
            h.hash(&key, &["a", "b"]),
            "same inputs must produce same output"
        );
    }

    #[test]
    fn test_key_isolation() {
        let h = HmacHasher;
        assert_ne!(h.hash(&[1u8; 32], &["a"]), h.hash(&[2u8; 32], &["a"]));
    }

    #[test]
    fn test_separator_prevents_ambiguity() {
        let h = HmacHasher;
        let key = [1u8; 32];
        // ("ab", "c") and ("a", "bc") serialize to "ab|c" and "a|bc".
        assert_ne!(h.hash(&key, &["ab", "c"]), h.hash(&key, &["a", "bc"]));
    }

    #[test]
    fn test_verify_rejects_bad_hex() {
        let h = HmacHasher;
        assert!(!h.verify(&[1u8; 32], "not-hex", &["a"]));
        assert!(!h.verify(&[1u8; 32], "", &["a"]));
    }

    #[test]
    fn test_verify_round_trip() {
        let h = HmacHasher;
        let key = [9u8; 32];
        let digest = h.hash(&key, &["poll", "secret"]);
        assert!(h.verify(&key, &digest, &["poll", "secret"]));
        assert!(!h.verify(&key, &digest, &["poll", "other"]));
    }

    proptest! {
        #[test]
        fn prop_collision_resistance(a in "[a-z0-9]{1,24}", b in "[a-z0-9]{1,24}") {
            prop_assume!(a != b);
            let h = HmacHasher;
            let key = [3u8; 32];
            prop_assert_ne!(h.hash(&key, &[&a]), h.hash(&key, &[&b]));
        }

        #[test]
        fn prop_verify_accepts_own_output(input in ".{0,64}") {
            let h = HmacHasher;
            let key = [5u8; 32];
            let digest = h.hash(&key, &[&input]);
            prop_assert!(h.verify(&key, &digest, &[&input]));
        }
    }
}
