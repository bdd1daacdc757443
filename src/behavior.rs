use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Aggregate counters over an agent's behavior history.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BehaviorStats {
    pub successes: u64,
    pub violations: u64,
}

impl BehaviorStats {
    pub fn total(&self) -> u64 {
        self.successes + self.violations
    }

    pub fn success_rate(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            None
        } else {
            Some(self.successes as f64 / total as f64)
        }
    }
}

/// One step of a Merkle inclusion path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: [u8; 32],
    /// True when the sibling sits to the left of the running hash.
    pub sibling_on_left: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub steps: Vec<ProofStep>,
}

/// Append-only commitment over interaction outcomes.
///
/// The root commits to the whole history; inclusion proofs reveal a single
/// outcome without exposing the rest of the log. Odd levels duplicate the
/// last node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorMerkleTree {
    leaves: Vec<[u8; 32]>,
}

fn leaf_hash(record: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(record);
    hasher.finalize().into()
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

impl BehaviorMerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: &[u8]) -> usize {
        self.leaves.push(leaf_hash(record));
        self.leaves.len() - 1
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Root digest in hex. The empty tree commits to the all-zero digest.
    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    pub fn root(&self) -> [u8; 32] {
        if self.leaves.is_empty() {
            return [0u8; 32];
        }
        let mut layer = self.leaves.clone();
        while layer.len() > 1 {
            if layer.len() % 2 == 1 {
                layer.push(*layer.last().unwrap_or(&[0u8; 32]));
            }
            layer = layer
                .chunks(2)
                .map(|pair| node_hash(&pair[0], &pair[1]))
                .collect();
        }
        layer[0]
    }

    pub fn proof_for(&self, leaf_index: usize) -> Option<MerkleProof> {
        if leaf_index >= self.leaves.len() {
            return None;
        }
        let mut steps = Vec::new();
        let mut layer = self.leaves.clone();
        let mut index = leaf_index;
        while layer.len() > 1 {
            if layer.len() % 2 == 1 {
                layer.push(*layer.last().unwrap_or(&[0u8; 32]));
            }
            let sibling_index = index ^ 1;
            steps.push(ProofStep {
                sibling: layer[sibling_index],
                sibling_on_left: sibling_index < index,
            });
            layer = layer
                .chunks(2)
                .map(|pair| node_hash(&pair[0], &pair[1]))
                .collect();
            index /= 2;
        }
        Some(MerkleProof { leaf_index, steps })
    }

    pub fn verify_proof(root: &[u8; 32], record: &[u8], proof: &MerkleProof) -> bool {
        let mut running = leaf_hash(record);
        for step in &proof.steps {
            running = if step.sibling_on_left {
                node_hash(&step.sibling, &running)
            } else {
                node_hash(&running, &step.sibling)
            };
        }
        running == *root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_changes_on_append() {
        let mut tree = BehaviorMerkleTree::new();
        assert_eq!(tree.root(), [0u8; 32]);

        tree.append(b"success:relay:2026-01-01");
        let one = tree.root();
        tree.append(b"violation:ttl:2026-01-02");
        let two = tree.root();
        assert_ne!(one, two);
    }

    #[test]
    fn test_inclusion_proofs_verify() {
        let mut tree = BehaviorMerkleTree::new();
        let records: Vec<Vec<u8>> = (0..5)
            .map(|i| format!("success:op-{}", i).into_bytes())
            .collect();
        for record in &records {
            tree.append(record);
        }
        let root = tree.root();

        for (i, record) in records.iter().enumerate() {
            let proof = tree.proof_for(i).unwrap();
            assert!(BehaviorMerkleTree::verify_proof(&root, record, &proof));
            assert!(!BehaviorMerkleTree::verify_proof(&root, b"forged", &proof));
        }
        assert!(tree.proof_for(5).is_none());
    }

    #[test]
    fn test_success_rate() {
        let stats = BehaviorStats {
            successes: 3,
            violations: 1,
        };
        assert_eq!(stats.success_rate(), Some(0.75));
        assert_eq!(BehaviorStats::default().success_rate(), None);
    }
}
