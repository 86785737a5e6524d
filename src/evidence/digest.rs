use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt::{Debug, Display};
use thiserror::Error;

/// Failure to produce the canonical byte form of a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvidenceError {
    #[error("canonical encoding failed: {0}")]
    Encoding(String),
}

/// A SHA-256 content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn to_hex(&self) -> String { hex::encode(self.0) }

    pub fn short(&self) -> String { hex::encode(&self.0[..6]) }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.to_hex()) }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Digest({})", self.short()) }
}

pub fn sha256(bytes: &[u8]) -> Digest { Digest(Sha256::digest(bytes).into()) }

/// SHA-256 over the concatenation of two digests, used for Merkle nodes.
pub fn sha256_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Digest(hasher.finalize().into())
}

/// Canonical, content-addressable byte form of `value`.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, EvidenceError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| EvidenceError::Encoding(e.to_string()))
}

/// Canonical bytes of `value` together with their hash.
pub fn content_digest<T: Serialize>(value: &T) -> Result<(Vec<u8>, Digest), EvidenceError> {
    let bytes = canonical_bytes(value)?;
    let digest = sha256(&bytes);
    Ok((bytes, digest))
}

/// Ed25519 identity of one signing component.
#[derive(Clone)]
pub struct EvidenceSigner {
    key: SigningKey,
}

impl EvidenceSigner {
    /// Creates a signer from a fresh random seed.
    pub fn generate() -> Self { Self::from_seed(rand::random::<[u8; 32]>()) }

    pub fn from_seed(seed: [u8; 32]) -> Self { Self { key: SigningKey::from_bytes(&seed) } }

    pub fn sign(&self, digest: &Digest) -> Signature { self.key.sign(&digest.0) }

    pub fn verifying_key(&self) -> VerifyingKey { self.key.verifying_key() }
}

impl Debug for EvidenceSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EvidenceSigner({})", hex::encode(&self.verifying_key().as_bytes()[..6]))
    }
}

pub fn verify_signature(key: &VerifyingKey, digest: &Digest, signature: &Signature) -> bool {
    key.verify(&digest.0, signature).is_ok()
}
