// Merkle Commitment Engine: per-part secrets bound to a single root

pub mod merkle;
pub mod secrets;

// Re-export key types
pub use merkle::{build_tree, hash_pair, leaf_for, verify, MerkleError, MerkleProof, MerkleTree};
pub use secrets::SecretSet;
