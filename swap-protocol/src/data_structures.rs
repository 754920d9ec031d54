use ethers::types::H256;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

// Amounts of any asset, native or token
pub type Balance = u128;

// Ledger time in seconds
pub type Timestamp = u64;

// 32-byte commitment values (leaves, internal nodes, roots)
pub type Hash = H256;

// Caller-chosen value the factory maps to a deterministic instance address
pub type Salt = H256;

// Represent a user account on some ledger
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId {
    pub chain_id: u64,
    pub address: String,
}

impl AccountId {
    pub fn new(chain_id: u64, address: impl Into<String>) -> Self {
        AccountId { chain_id, address: address.into() }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.chain_id)
    }
}

// Represent a specific asset on a specific ledger
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId {
    pub chain_id: u64,
    pub token_symbol: String,  // e.g., "ETH", "DOT", "USDC"
    pub token_address: String, // empty for the ledger's native asset
}

impl AssetId {
    pub fn native(chain_id: u64, symbol: impl Into<String>) -> Self {
        AssetId { chain_id, token_symbol: symbol.into(), token_address: String::new() }
    }

    pub fn token(chain_id: u64, symbol: impl Into<String>, address: impl Into<String>) -> Self {
        AssetId { chain_id, token_symbol: symbol.into(), token_address: address.into() }
    }

    pub fn is_native(&self) -> bool {
        self.token_address.is_empty()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.token_symbol, self.chain_id)
    }
}

/// A per-part preimage. Revealing it (with its Merkle proof) releases exactly one part.
///
/// `Debug` never prints the value; use [`Secret::to_hex`] where disclosure is intended.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(H256);

impl Secret {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Secret(H256(bytes))
    }

    /// Rejects anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let fixed: [u8; 32] = bytes.try_into().ok()?;
        Some(Self::from_bytes(fixed))
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_fixed_bytes()
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}
