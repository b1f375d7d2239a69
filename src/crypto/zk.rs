//! Optional Groth16 verification of nullifier proofs.
//!
//! A client may attach a proof that its `(nullifier_hash, poll_id_hash)`
//! public signals were produced honestly. The verifying key is loaded from
//! disk at startup; when none is configured the verifier is disabled.
//! Disabled-and-fail-open is a dev/test convenience only; in prod the path
//! fails closed and any submitted proof is rejected until a key is deployed.

use ark_bn254::{Bn254, Fr};
use ark_ff::PrimeField;
use ark_groth16::r1cs_to_qap::LibsnarkReduction;
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_serialize::CanonicalDeserialize;
use ark_snark::SNARK;
use thiserror::Error;

use crate::config::AppEnv;

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("verifying key unreadable: {0}")]
    KeyLoad(String),

    #[error("proof verification unavailable: no verifying key loaded")]
    VerifierUnavailable,

    #[error("malformed proof: {0}")]
    Malformed(String),

    #[error("proof did not verify")]
    Invalid,
}

/// Verifier for the `(nullifier_hash, poll_id_hash)` public-signal pair.
pub struct NullifierProofVerifier {
    pvk: Option<PreparedVerifyingKey<Bn254>>,
    fail_closed: bool,
}

impl NullifierProofVerifier {
    /// Build from config. Absence of a key path disables verification
    /// without breaking the pipeline; in prod the disabled path fails closed.
    pub fn from_config(key_path: Option<&str>, env: AppEnv) -> Result<Self, ProofError> {
        match key_path {
            Some(path) => {
                let bytes =
                    std::fs::read(path).map_err(|e| ProofError::KeyLoad(e.to_string()))?;
                let vk = VerifyingKey::<Bn254>::deserialize_compressed(&bytes[..])
                    .map_err(|e| ProofError::KeyLoad(e.to_string()))?;
                Ok(Self {
                    pvk: Some(prepare_verifying_key(&vk)),
                    fail_closed: env.is_prod(),
                })
            }
            None => {
                if env.is_prod() {
                    tracing::warn!("no zk verifying key configured; proofs will be rejected");
                } else {
                    tracing::warn!("no zk verifying key configured; proofs accepted unverified");
                }
                Ok(Self {
                    pvk: None,
                    fail_closed: env.is_prod(),
                })
            }
        }
    }

    /// Verifier with no key (tests).
    pub fn disabled(fail_closed: bool) -> Self {
        Self {
            pvk: None,
            fail_closed,
        }
    }

    pub fn enabled(&self) -> bool {
        self.pvk.is_some()
    }

    /// Verify a compressed Groth16 proof over the two public signals.
    ///
    /// The signals arrive as the hex digests the pipeline already computed;
    /// they are mapped into the scalar field the same way a circuit would
    /// receive them.
    pub fn verify(
        &self,
        proof_bytes: &[u8],
        nullifier_hash: &str,
        poll_id_hash: &str,
    ) -> Result<(), ProofError> {
        let Some(pvk) = &self.pvk else {
            if self.fail_closed {
                return Err(ProofError::VerifierUnavailable);
            }
            return Ok(());
        };

        let proof = Proof::<Bn254>::deserialize_compressed(proof_bytes)
            .map_err(|e| ProofError::Malformed(e.to_string()))?;

        let public_inputs = [
            field_from_hex(nullifier_hash)?,
            field_from_hex(poll_id_hash)?,
        ];

        let ok = Groth16::<Bn254, LibsnarkReduction>::verify_with_processed_vk(
            pvk,
            &public_inputs,
            &proof,
        )
        .map_err(|e| ProofError::Malformed(e.to_string()))?;

        if ok {
            Ok(())
        } else {
            Err(ProofError::Invalid)
        }
    }
}

fn field_from_hex(hex_digest: &str) -> Result<Fr, ProofError> {
    let bytes = hex::decode(hex_digest)
        .map_err(|e| ProofError::Malformed(format!("public signal hex: {e}")))?;
    Ok(Fr::from_be_bytes_mod_order(&bytes))
}
