use super::digest::{Digest, EvidenceError, EvidenceSigner, content_digest, sha256, verify_signature};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::sync::LazyLock;
use strum_macros::{Display, EnumIter};

/// `previous_hash` of the first entry in every chain.
pub static GENESIS_HASH: LazyLock<Digest> = LazyLock::new(|| sha256(b"targeting-bus/evidence/genesis/v1"));

/// Message type recorded in an evidence entry.
#[derive(Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EvidenceKind {
    TrackUpdate = 1,
    FireSolution = 2,
    EngagementReport = 3,
    SessionTransition = 4,
    SolutionExpired = 5,
    AnchorReceipt = 6,
}

/// `node/component` address of a message endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(node: &str, component: &str) -> Self { Self(format!("{node}/{component}")) }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// A message ready to be appended: its canonical bytes, their hash and its endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceRecord {
    pub kind: EvidenceKind,
    pub sender: NodeId,
    pub receiver: NodeId,
    pub payload: Vec<u8>,
    pub content_hash: Digest,
}

impl EvidenceRecord {
    /// Canonically encodes `message` and hashes it.
    ///
    /// # Errors
    /// - [`EvidenceError::Encoding`] if `message` cannot be encoded.
    pub fn of<T: Serialize>(
        kind: EvidenceKind,
        message: &T,
        sender: NodeId,
        receiver: NodeId,
    ) -> Result<Self, EvidenceError> {
        let (payload, content_hash) = content_digest(message)?;
        Ok(Self { kind, sender, receiver, payload, content_hash })
    }
}

/// One append-only ledger record.
///
/// `entry_hash` covers every header field including `previous_hash`, and the
/// signature is taken over `entry_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    index: u64,
    timestamp: DateTime<Utc>,
    kind: EvidenceKind,
    content_hash: Digest,
    sender: NodeId,
    receiver: NodeId,
    previous_hash: Digest,
    entry_hash: Digest,
    payload: Vec<u8>,
    signature: Signature,
}

impl EvidenceEntry {
    pub(super) fn seal(
        index: u64,
        timestamp: DateTime<Utc>,
        record: EvidenceRecord,
        previous_hash: Digest,
        signer: &EvidenceSigner,
    ) -> Self {
        let mut entry = Self {
            index,
            timestamp,
            kind: record.kind,
            content_hash: record.content_hash,
            sender: record.sender,
            receiver: record.receiver,
            previous_hash,
            entry_hash: previous_hash,
            payload: record.payload,
            signature: Signature::from_bytes(&[0u8; 64]),
        };
        entry.entry_hash = entry.compute_entry_hash();
        entry.signature = signer.sign(&entry.entry_hash);
        entry
    }

    /// Hash over the header fields, length-prefixing the variable-size ones.
    pub fn compute_entry_hash(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.timestamp.timestamp_micros().to_le_bytes());
        hasher.update([self.kind as u8]);
        hasher.update(self.content_hash.0);
        for node in [&self.sender, &self.receiver] {
            hasher.update((node.0.len() as u64).to_le_bytes());
            hasher.update(node.0.as_bytes());
        }
        hasher.update(self.previous_hash.0);
        Digest(hasher.finalize().into())
    }

    /// Recomputes payload hash, entry hash and signature.
    pub fn is_intact(&self, key: &VerifyingKey) -> bool {
        sha256(&self.payload) == self.content_hash
            && self.compute_entry_hash() == self.entry_hash
            && verify_signature(key, &self.entry_hash, &self.signature)
    }

    pub fn index(&self) -> u64 { self.index }
    pub fn timestamp(&self) -> DateTime<Utc> { self.timestamp }
    pub fn kind(&self) -> EvidenceKind { self.kind }
    pub fn content_hash(&self) -> Digest { self.content_hash }
    pub fn sender(&self) -> &NodeId { &self.sender }
    pub fn receiver(&self) -> &NodeId { &self.receiver }
    pub fn previous_hash(&self) -> Digest { self.previous_hash }
    pub fn entry_hash(&self) -> Digest { self.entry_hash }
    pub fn payload(&self) -> &[u8] { &self.payload }
    pub fn signature(&self) -> &Signature { &self.signature }

    #[cfg(test)]
    pub(crate) fn payload_mut_unchecked(&mut self) -> &mut Vec<u8> { &mut self.payload }
}
