//! Binary Keccak-256 Merkle tree over per-part leaves.
//!
//! Leaves are paired two at a time in index order. An odd trailing node is carried
//! to the next layer unchanged and contributes no sibling at that layer, so a proof
//! can be shorter than the tree height. Operand order inside every hash step is
//! decided by position (even index on the left), never by comparing hash values.

use crate::data_structures::{Hash, Secret};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("cannot build a commitment tree without leaves")]
    EmptyTree,
    #[error("leaf count {0} does not fit a u32 part index")]
    TooManyLeaves(usize),
    #[error("leaf index {index} out of range for {leaf_count} leaves")]
    IndexOutOfRange { index: u32, leaf_count: u32 },
}

/// Leaf commitment for one part: `keccak256(abi.encode(uint32 part_index, bytes32 secret))`.
pub fn leaf_for(part_index: u32, secret: &Secret) -> Hash {
    let mut preimage = [0u8; 64];
    preimage[28..32].copy_from_slice(&part_index.to_be_bytes());
    preimage[32..].copy_from_slice(secret.as_bytes());
    Hash::from(keccak256(preimage))
}

pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(left.as_bytes());
    preimage[32..].copy_from_slice(right.as_bytes());
    Hash::from(keccak256(preimage))
}

/// Inclusion proof for a single leaf.
///
/// The leaf position is part of the proof: with odd-node promotion the sibling
/// sequence alone does not say at which layers the leaf was carried up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: u32,
    pub leaf_count: u32,
    pub siblings: Vec<Hash>,
}

impl MerkleProof {
    pub fn new(leaf_index: u32, leaf_count: u32, siblings: Vec<Hash>) -> Self {
        MerkleProof { leaf_index, leaf_count, siblings }
    }
}

#[derive(Clone, Debug)]
pub struct MerkleTree {
    // layers[0] are the leaves, the last layer holds only the root
    layers: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn new(leaves: Vec<Hash>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyTree);
        }
        if u32::try_from(leaves.len()).is_err() {
            return Err(MerkleError::TooManyLeaves(leaves.len()));
        }

        let mut layers = vec![leaves];
        while layers[layers.len() - 1].len() > 1 {
            let pairs = layers[layers.len() - 1].chunks_exact(2);
            // Odd trailing node is promoted unchanged
            let promoted = pairs.remainder().first().copied();
            let next = pairs
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .chain(promoted)
                .collect();
            layers.push(next);
        }
        Ok(MerkleTree { layers })
    }

    pub fn root(&self) -> Hash {
        self.layers[self.layers.len() - 1][0]
    }

    pub fn leaf_count(&self) -> u32 {
        // Bounded by the check in `new`
        self.layers[0].len() as u32
    }

    pub fn leaves(&self) -> &[Hash] {
        &self.layers[0]
    }

    pub fn proof(&self, leaf_index: u32) -> Result<MerkleProof, MerkleError> {
        let leaf_count = self.leaf_count();
        if leaf_index >= leaf_count {
            return Err(MerkleError::IndexOutOfRange { index: leaf_index, leaf_count });
        }

        let mut siblings = Vec::new();
        let mut position = leaf_index as usize;
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = position ^ 1;
            if sibling < layer.len() {
                siblings.push(layer[sibling]);
            }
            position /= 2;
        }
        Ok(MerkleProof::new(leaf_index, leaf_count, siblings))
    }
}

/// Builds the tree and one proof per leaf.
pub fn build_tree(leaves: Vec<Hash>) -> Result<(Hash, Vec<MerkleProof>), MerkleError> {
    let tree = MerkleTree::new(leaves)?;
    let proofs = (0..tree.leaf_count())
        .map(|index| tree.proof(index))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((tree.root(), proofs))
}

/// Recomputes the root from `leaf` and `proof` and compares it with `root`.
///
/// Malformed proofs (index out of range, missing or surplus siblings) are simply invalid.
pub fn verify(leaf: &Hash, proof: &MerkleProof, root: &Hash) -> bool {
    if proof.leaf_count == 0 || proof.leaf_index >= proof.leaf_count {
        return false;
    }

    let mut siblings = proof.siblings.iter();
    let mut current = *leaf;
    let mut position = proof.leaf_index as u64;
    let mut width = proof.leaf_count as u64;

    while width > 1 {
        if position % 2 == 1 {
            match siblings.next() {
                Some(left) => current = hash_pair(left, &current),
                None => return false,
            }
        } else if position + 1 < width {
            match siblings.next() {
                Some(right) => current = hash_pair(&current, right),
                None => return false,
            }
        }
        position /= 2;
        width = (width + 1) / 2;
    }

    siblings.next().is_none() && current == *root
}
