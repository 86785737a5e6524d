use super::digest::{Digest, sha256_pair};
use serde::{Deserialize, Serialize};

/// Sibling hash on the path from a leaf to the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Digest,
    /// Whether the sibling is the left operand of the parent hash.
    pub sibling_is_left: bool,
}

/// Inclusion proof of one entry hash in an anchored batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: Digest,
    pub leaf_index: usize,
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Folds the path and compares the result with `root`.
    pub fn verify(&self, root: &Digest) -> bool {
        let folded = self.path.iter().fold(self.leaf, |acc, step| {
            if step.sibling_is_left { sha256_pair(&step.sibling, &acc) } else { sha256_pair(&acc, &step.sibling) }
        });
        folded == *root
    }
}

fn next_level(level: &[Digest]) -> Vec<Digest> {
    level.chunks(2).map(|pair| sha256_pair(&pair[0], pair.get(1).unwrap_or(&pair[0]))).collect()
}

/// Merkle root over `leaves`; an odd node at any level is paired with itself.
pub fn merkle_root(leaves: &[Digest]) -> Option<Digest> {
    if leaves.is_empty() {
        return None;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.first().copied()
}

/// Inclusion proof for `leaves[index]`.
pub fn merkle_proof(leaves: &[Digest], index: usize) -> Option<MerkleProof> {
    let leaf = *leaves.get(index)?;
    let mut path = Vec::new();
    let mut level = leaves.to_vec();
    let mut pos = index;
    while level.len() > 1 {
        let sibling_pos = pos ^ 1;
        let sibling = *level.get(sibling_pos).unwrap_or(&level[pos]);
        path.push(ProofStep { sibling, sibling_is_left: sibling_pos < pos });
        level = next_level(&level);
        pos /= 2;
    }
    Some(MerkleProof { leaf, leaf_index: index, path })
}
