//! A binary hash tree over the eligibility set.
//!
//! Siblings are sorted by byte value before being hashed together, so a proof
//! is just the list of sibling hashes: no left/right flags are needed and the
//! on-chain verifier can fold them in any position. When a level has an odd
//! number of nodes the last one is carried up to the next level unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{digest::Digest, identity::Leaf};

/// The commitment to the whole eligibility set.
pub type Root = Digest;

/// Hash two nodes in canonical (sorted) order.
pub fn hash_pair(a: &Digest, b: &Digest) -> Digest {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    Digest::hash(&[low.as_bytes(), high.as_bytes()])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulator {
    /// `levels[0]` holds the leaves, the last level holds only the root.
    levels: Vec<Vec<Digest>>,
    /// First position of each leaf in `levels[0]`.
    positions: HashMap<Leaf, usize>,
}

impl Accumulator {
    /// Build the tree over the eligibility set, in the order given.
    pub fn build(leaves: Vec<Leaf>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(Error::EmptyEligibilitySet);
        }

        let mut positions = HashMap::with_capacity(leaves.len());
        for (i, leaf) in leaves.iter().enumerate() {
            positions.entry(*leaf).or_insert(i);
        }

        let mut levels = vec![leaves];
        while levels.last().map_or(false, |level| level.len() > 1) {
            let below = &levels[levels.len() - 1];
            let above = below
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(a, b),
                    [carried] => *carried,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(above);
        }

        Ok(Self { levels, positions })
    }

    pub fn root(&self) -> Root {
        // Never empty: `build` rejects empty sets.
        self.levels[self.levels.len() - 1][0]
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    pub fn contains(&self, leaf: &Leaf) -> bool {
        self.positions.contains_key(leaf)
    }

    pub fn leaves(&self) -> &[Leaf] {
        &self.levels[0]
    }

    /// The sibling path from `leaf` to the root, if the leaf is a member.
    pub fn proof(&self, leaf: &Leaf) -> Option<InclusionProof> {
        let mut index = *self.positions.get(leaf)?;
        let mut siblings = Vec::with_capacity(self.levels.len());
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            // A carried-up node has no sibling at this level.
            if let Some(node) = level.get(sibling) {
                siblings.push(*node);
            }
            index /= 2;
        }
        Some(InclusionProof { siblings })
    }
}

/// Sibling hashes sufficient to recompute the root from a leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InclusionProof {
    pub siblings: Vec<Digest>,
}

impl InclusionProof {
    pub fn compute_root(&self, leaf: &Leaf) -> Root {
        self.siblings
            .iter()
            .fold(*leaf, |node, sibling| hash_pair(&node, sibling))
    }

    pub fn verify(&self, leaf: &Leaf, root: &Root) -> bool {
        self.compute_root(leaf) == *root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Leaf {
        Digest::hash(&[&[n]])
    }

    fn leaves(count: u8) -> Vec<Leaf> {
        (0..count).map(leaf).collect()
    }

    #[test]
    fn empty_set_is_rejected() {
        assert!(matches!(
            Accumulator::build(vec![]),
            Err(Error::EmptyEligibilitySet)
        ));
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let tree = Accumulator::build(vec![leaf(1)]).unwrap();
        assert_eq!(tree.root(), leaf(1));
        let proof = tree.proof(&leaf(1)).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(proof.verify(&leaf(1), &tree.root()));
    }

    #[test]
    fn two_leaves_hash_in_sorted_order() {
        let (a, b) = (leaf(1), leaf(2));
        let forward = Accumulator::build(vec![a, b]).unwrap();
        let backward = Accumulator::build(vec![b, a]).unwrap();
        assert_eq!(forward.root(), hash_pair(&a, &b));
        assert_eq!(forward.root(), backward.root());
    }

    #[test]
    fn odd_node_is_carried_up() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let tree = Accumulator::build(vec![a, b, c]).unwrap();
        assert_eq!(tree.root(), hash_pair(&hash_pair(&a, &b), &c));

        // The carried leaf skips the bottom level.
        let proof = tree.proof(&c).unwrap();
        assert_eq!(proof.siblings, vec![hash_pair(&a, &b)]);
    }

    #[test]
    fn every_member_proves_to_the_root() {
        for count in 1..=33 {
            let set = leaves(count);
            let tree = Accumulator::build(set.clone()).unwrap();
            assert_eq!(tree.len(), count as usize);
            for member in &set {
                let proof = tree.proof(member).unwrap();
                assert!(
                    proof.verify(member, &tree.root()),
                    "leaf {member} in a set of {count}"
                );
            }
        }
    }

    #[test]
    fn non_members_have_no_proof() {
        let tree = Accumulator::build(leaves(5)).unwrap();
        assert!(!tree.contains(&leaf(9)));
        assert!(tree.proof(&leaf(9)).is_none());
    }

    #[test]
    fn proofs_do_not_transfer() {
        let tree = Accumulator::build(leaves(8)).unwrap();
        let proof = tree.proof(&leaf(0)).unwrap();
        assert!(!proof.verify(&leaf(9), &tree.root()));
        assert!(!proof.verify(&leaf(1), &tree.root()));

        // Nor to a different set.
        let other = Accumulator::build(leaves(9)).unwrap();
        assert!(!proof.verify(&leaf(0), &other.root()));
    }

    #[test]
    fn root_commits_to_membership() {
        let two = Accumulator::build(leaves(2)).unwrap();
        let three = Accumulator::build(leaves(3)).unwrap();
        assert_ne!(two.root(), three.root());
    }
}
