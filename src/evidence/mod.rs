//! Tamper-evident record of every engagement decision.
//!
//! Entries are hash-linked from a fixed genesis constant and signed with the node's
//! Ed25519 key. New entries are periodically batched into a Merkle root and anchored
//! on an external ledger; the anchor receipt is appended as the batch's terminal entry.

mod anchor;
mod anchor_scheduler;
mod digest;
mod evidence_chain;
mod evidence_entry;
mod merkle;

pub use anchor::{AnchorError, AnchorProvider, AnchorReceipt, ChainTxRef, LocalAnchor, SolanaRpcAnchor};
pub use anchor_scheduler::AnchorScheduler;
pub use digest::{
    Digest, EvidenceError, EvidenceSigner, canonical_bytes, content_digest, sha256, sha256_pair, verify_signature,
};
pub use evidence_chain::{EvidenceChain, IntegrityAlarm, IntegrityError, SharedChain};
pub use evidence_entry::{EvidenceEntry, EvidenceKind, EvidenceRecord, GENESIS_HASH, NodeId};
pub use merkle::{MerkleProof, ProofStep, merkle_proof, merkle_root};
