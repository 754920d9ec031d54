// Off-ledger secret generation for a partially fillable swap

use crate::commitment::merkle::{leaf_for, MerkleError, MerkleProof, MerkleTree};
use crate::data_structures::{Hash, Secret};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

/// The maker's private material for one swap: one secret per part, the
/// commitment tree over their leaves, and the root both escrow legs lock to.
#[derive(Clone, Debug)]
pub struct SecretSet {
    secrets: Vec<Secret>,
    tree: MerkleTree,
}

impl SecretSet {
    pub fn generate(parts_count: u32) -> Result<Self, MerkleError> {
        Self::generate_with(parts_count, &mut OsRng)
    }

    pub fn generate_with<R: RngCore + CryptoRng>(
        parts_count: u32,
        rng: &mut R,
    ) -> Result<Self, MerkleError> {
        let secrets = (0..parts_count).map(|_| Secret::random(rng)).collect();
        Self::from_secrets(secrets)
    }

    pub fn from_secrets(secrets: Vec<Secret>) -> Result<Self, MerkleError> {
        if u32::try_from(secrets.len()).is_err() {
            return Err(MerkleError::TooManyLeaves(secrets.len()));
        }
        let leaves = secrets
            .iter()
            .enumerate()
            .map(|(index, secret)| leaf_for(index as u32, secret))
            .collect();
        let tree = MerkleTree::new(leaves)?;
        Ok(SecretSet { secrets, tree })
    }

    pub fn root(&self) -> Hash {
        self.tree.root()
    }

    pub fn parts_count(&self) -> u32 {
        self.tree.leaf_count()
    }

    pub fn secret(&self, part_index: u32) -> Option<&Secret> {
        self.secrets.get(part_index as usize)
    }

    pub fn proof(&self, part_index: u32) -> Result<MerkleProof, MerkleError> {
        self.tree.proof(part_index)
    }

    /// Secret and sibling path for one part, ready to submit as a claim.
    pub fn claim_material(&self, part_index: u32) -> Result<(Secret, Vec<Hash>), MerkleError> {
        let proof = self.proof(part_index)?;
        // proof() already rejected out-of-range indices
        let secret = self.secrets[part_index as usize];
        Ok((secret, proof.siblings))
    }

    pub fn leaves(&self) -> &[Hash] {
        self.tree.leaves()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::merkle::verify;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_set_verifies_every_part() {
        let mut rng = StdRng::seed_from_u64(42);
        let set = SecretSet::generate_with(4, &mut rng).unwrap();
        assert_eq!(set.parts_count(), 4);
        for i in 0..4 {
            let secret = set.secret(i).unwrap();
            let proof = set.proof(i).unwrap();
            assert!(verify(&leaf_for(i, secret), &proof, &set.root()));
        }
    }

    #[test]
    fn wrong_secret_does_not_verify() {
        let mut rng = StdRng::seed_from_u64(1);
        let set = SecretSet::generate_with(4, &mut rng).unwrap();
        let intruder = Secret::random(&mut rng);
        let proof = set.proof(0).unwrap();
        assert!(!verify(&leaf_for(0, &intruder), &proof, &set.root()));
    }

    #[test]
    fn zero_parts_is_rejected() {
        assert_eq!(SecretSet::generate(0).unwrap_err(), MerkleError::EmptyTree);
    }

    #[test]
    fn same_secrets_give_same_root() {
        let secrets = vec![Secret::from_bytes([1; 32]), Secret::from_bytes([2; 32])];
        let a = SecretSet::from_secrets(secrets.clone()).unwrap();
        let b = SecretSet::from_secrets(secrets).unwrap();
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn claim_material_out_of_range() {
        let set = SecretSet::from_secrets(vec![Secret::from_bytes([9; 32])]).unwrap();
        assert!(set.claim_material(1).is_err());
        let (secret, siblings) = set.claim_material(0).unwrap();
        assert_eq!(secret, Secret::from_bytes([9; 32]));
        assert!(siblings.is_empty());
    }
}
