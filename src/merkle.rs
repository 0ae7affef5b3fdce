//! Binary Merkle tree over an ordered telemetry log.
//!
//! ## Algorithm
//!
//! - Leaf: `digest(entry)`
//! - Parent: `digest(left || right)` over the textual encodings
//! - Odd node count: the last node is promoted unchanged (never self-paired)
//! - Empty input: no root
//!
//! The tree is a pure function of the ordered input. Reordering entries
//! changes the root.

use serde::{Deserialize, Serialize};

use crate::digest::{digest_value, DigestRef, Hash};
use crate::error::CoreError;

/// Which side of the running hash a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPosition {
    Left,
    Right,
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub position: SiblingPosition,
    pub hash: Hash,
}

/// Sibling digests from a leaf up to the root, bottom level first.
///
/// Levels where the walked node had no sibling (promoted boundary node)
/// contribute no step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proof(Vec<ProofStep>);

impl Proof {
    pub fn steps(&self) -> &[ProofStep] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the sibling sides are consistent with leaf `index`.
    ///
    /// A node with no sibling is always the last node of its level, and it
    /// stays last on every level above, so it can only ever gain a left
    /// sibling. Levels without a step are therefore recognised by an even
    /// index meeting a left-hand step, and the walk must end at index 0.
    /// Without the leaf count, indices that differ only on promoted levels
    /// cannot be told apart.
    pub fn fits_index(&self, index: usize) -> bool {
        let mut idx = index;
        let mut promoted = false;
        for step in &self.0 {
            while idx % 2 == 0 && step.position == SiblingPosition::Left {
                if idx == 0 {
                    return false;
                }
                promoted = true;
                idx /= 2;
            }
            if step.position == SiblingPosition::Right && (promoted || idx % 2 == 1) {
                return false;
            }
            idx /= 2;
        }
        idx == 0
    }
}

impl From<Vec<ProofStep>> for Proof {
    fn from(steps: Vec<ProofStep>) -> Self {
        Self(steps)
    }
}

/// All levels of a built tree.
///
/// # Invariants
/// - `levels[0]` holds the leaf digests in input order
/// - `levels[i + 1].len() == ceil(levels[i].len() / 2)`
/// - the last level has exactly one node unless the input was empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn levels(&self) -> &[Vec<Hash>] {
        &self.levels
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Top of the final level, `None` for an empty log.
    pub fn root(&self) -> Option<&Hash> {
        self.levels.last().and_then(|level| level.first())
    }

    /// Walk from leaf `index` to the root collecting sibling digests.
    ///
    /// # Errors
    /// `CoreError::IndexOutOfRange` if `index >= leaf_count()`.
    pub fn proof(&self, index: usize) -> Result<Proof, CoreError> {
        let len = self.leaf_count();
        if index >= len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }

        let mut steps = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = idx ^ 1;
            if let Some(sibling) = level.get(sibling_idx) {
                let position = if idx % 2 == 1 {
                    SiblingPosition::Left
                } else {
                    SiblingPosition::Right
                };
                steps.push(ProofStep {
                    position,
                    hash: sibling.clone(),
                });
            }
            idx /= 2;
        }
        Ok(Proof(steps))
    }
}

/// Root computation and inclusion proofs over a pluggable digest.
#[derive(Debug, Clone)]
pub struct MerkleEngine {
    digest: DigestRef,
}

impl MerkleEngine {
    pub fn new(digest: DigestRef) -> Self {
        Self { digest }
    }

    pub fn digest(&self) -> &DigestRef {
        &self.digest
    }

    pub fn leaf_digest<T: Serialize + ?Sized>(&self, entry: &T) -> Result<Hash, CoreError> {
        digest_value(self.digest.as_ref(), entry)
    }

    fn node_digest(&self, left: &Hash, right: &Hash) -> Hash {
        let mut joined = String::with_capacity(left.as_str().len() + right.as_str().len());
        joined.push_str(left.as_str());
        joined.push_str(right.as_str());
        self.digest.digest_str(&joined)
    }

    pub fn build_tree<T: Serialize>(&self, entries: &[T]) -> Result<MerkleTree, CoreError> {
        let leaves = entries
            .iter()
            .map(|entry| self.leaf_digest(entry))
            .collect::<Result<Vec<_>, _>>()?;

        let mut levels = vec![leaves];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<Hash> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => self.node_digest(left, right),
                    [single] => single.clone(),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }
        Ok(MerkleTree { levels })
    }

    pub fn root<T: Serialize>(&self, entries: &[T]) -> Result<Option<Hash>, CoreError> {
        Ok(self.build_tree(entries)?.root().cloned())
    }

    pub fn proof<T: Serialize>(&self, entries: &[T], index: usize) -> Result<Proof, CoreError> {
        if index >= entries.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: entries.len(),
            });
        }
        self.build_tree(entries)?.proof(index)
    }

    /// Recompute the root from a single leaf and compare.
    ///
    /// Needs only the leaf value, its index and the proof, never the full
    /// log. A proof whose sibling sides do not fit `index` never verifies.
    pub fn verify_proof<T: Serialize + ?Sized>(
        &self,
        leaf: &T,
        index: usize,
        proof: &Proof,
        expected_root: &Hash,
    ) -> Result<bool, CoreError> {
        if !proof.fits_index(index) {
            return Ok(false);
        }
        let mut current = self.leaf_digest(leaf)?;
        for step in proof.steps() {
            current = match step.position {
                SiblingPosition::Left => self.node_digest(&step.hash, &current),
                SiblingPosition::Right => self.node_digest(&current, &step.hash),
            };
        }
        Ok(&current == expected_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{Djb2Digest, Sha256Digest};
    use std::sync::Arc;

    fn engine() -> MerkleEngine {
        MerkleEngine::new(Arc::new(Djb2Digest))
    }

    fn entries(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("e{}", i + 1)).collect()
    }

    #[test]
    fn empty_log_has_no_root() {
        let tree = engine().build_tree::<String>(&[]).unwrap();
        assert_eq!(tree.root(), None);
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn single_entry_root_is_leaf_digest() {
        let engine = engine();
        let root = engine.root(&["only"]).unwrap().unwrap();
        assert_eq!(root, engine.leaf_digest("only").unwrap());
    }

    #[test]
    fn odd_node_is_promoted_not_rehashed() {
        let engine = engine();
        let tree = engine.build_tree(&entries(3)).unwrap();
        let levels = tree.levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[1].len(), 2);
        assert_eq!(levels[1][1], levels[0][2]);
    }

    #[test]
    fn root_is_deterministic() {
        let engine = engine();
        let log = entries(7);
        let reference = engine.root(&log).unwrap();
        for _ in 0..50 {
            assert_eq!(engine.root(&log).unwrap(), reference);
        }
    }

    #[test]
    fn order_and_content_matter() {
        let engine = engine();
        let root = engine.root(&["e1", "e2", "e3"]).unwrap();
        assert_ne!(root, engine.root(&["e2", "e1", "e3"]).unwrap());
        assert_ne!(root, engine.root(&["e1", "e2", "e4"]).unwrap());
    }

    #[test]
    fn every_leaf_proves_inclusion() {
        let engine = engine();
        for n in 1..=17 {
            let log = entries(n);
            let root = engine.root(&log).unwrap().unwrap();
            for (i, entry) in log.iter().enumerate() {
                let proof = engine.proof(&log, i).unwrap();
                assert!(
                    engine.verify_proof(entry, i, &proof, &root).unwrap(),
                    "leaf {} of {} failed",
                    i,
                    n
                );
            }
        }
    }

    #[test]
    fn every_leaf_proves_inclusion_with_sha256() {
        let engine = MerkleEngine::new(Arc::new(Sha256Digest));
        let log = entries(6);
        let root = engine.root(&log).unwrap().unwrap();
        for (i, entry) in log.iter().enumerate() {
            let proof = engine.proof(&log, i).unwrap();
            assert!(engine.verify_proof(entry, i, &proof, &root).unwrap());
        }
    }

    #[test]
    fn any_single_bit_flip_fails_verification() {
        let digests: [DigestRef; 2] = [Arc::new(Djb2Digest), Arc::new(Sha256Digest)];
        for digest in digests {
            let engine = MerkleEngine::new(digest);
            for n in [1, 2, 3, 5, 8] {
                let log = entries(n);
                let root = engine.root(&log).unwrap().unwrap();
                for (i, entry) in log.iter().enumerate() {
                    let proof = engine.proof(&log, i).unwrap();
                    for byte in 0..entry.len() {
                        // Bits 0..=6 keep ASCII text valid UTF-8.
                        for bit in 0..=6 {
                            let mut bytes = entry.clone().into_bytes();
                            bytes[byte] ^= 1 << bit;
                            let mutated = String::from_utf8(bytes).unwrap();
                            assert!(
                                !engine.verify_proof(&mutated, i, &proof, &root).unwrap(),
                                "{} accepted {:?} for leaf {} of {}",
                                engine.digest().name(),
                                mutated,
                                i,
                                n
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn proof_sides_must_fit_the_index() {
        let engine = engine();
        for n in 1..=17 {
            let log = entries(n);
            for i in 0..n {
                assert!(engine.proof(&log, i).unwrap().fits_index(i), "leaf {} of {}", i, n);
            }
        }

        // Leaf 1 of two has its sibling on the left; even indices cannot.
        let log = entries(2);
        let root = engine.root(&log).unwrap().unwrap();
        let proof = engine.proof(&log, 1).unwrap();
        assert!(engine.verify_proof(&log[1], 1, &proof, &root).unwrap());
        assert!(!engine.verify_proof(&log[1], 0, &proof, &root).unwrap());
        assert!(!engine.verify_proof(&log[1], 3, &proof, &root).unwrap());

        let log = entries(4);
        let root = engine.root(&log).unwrap().unwrap();
        let proof = engine.proof(&log, 0).unwrap();
        for wrong in [1, 2, 3] {
            assert!(!engine.verify_proof(&log[0], wrong, &proof, &root).unwrap());
        }
    }

    #[test]
    fn proof_skips_levels_without_sibling() {
        let engine = engine();
        let log = entries(3);
        // Leaf 2 is promoted at level 0 and only pairs at level 1.
        let proof = engine.proof(&log, 2).unwrap();
        assert_eq!(proof.len(), 1);
        assert_eq!(proof.steps()[0].position, SiblingPosition::Left);

        let proof = engine.proof(&log, 0).unwrap();
        assert_eq!(proof.len(), 2);
        assert_eq!(proof.steps()[0].position, SiblingPosition::Right);
        assert_eq!(proof.steps()[1].position, SiblingPosition::Right);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let engine = engine();
        let err = engine.proof(&entries(3), 3).unwrap_err();
        assert_eq!(err, CoreError::IndexOutOfRange { index: 3, len: 3 });
        let err = engine.proof::<String>(&[], 0).unwrap_err();
        assert_eq!(err, CoreError::IndexOutOfRange { index: 0, len: 0 });
    }

    #[test]
    fn proof_serializes_with_lowercase_positions() {
        let engine = engine();
        let proof = engine.proof(&["a", "b"], 1).unwrap();
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json[0]["position"], "left");
    }
}
