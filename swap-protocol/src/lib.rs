// Partially fillable cross-ledger atomic swaps built on Merkle-committed escrows

pub mod commitment;
pub mod config;
pub mod cross_chain;
pub mod data_structures;
pub mod onchain;

pub mod test_utils;
