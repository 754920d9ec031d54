// Ledger-side escrow logic and an in-process ledger to run it on

pub mod chain_simulator;
pub mod escrow_contract;
pub mod events;
pub mod factory;
pub mod interface;
pub mod timelocks;

pub use crate::data_structures::{AccountId, AssetId};
pub use chain_simulator::{ChainSimulator, SimulatedLedger};
pub use escrow_contract::{
    CallContext, EscrowCall, EscrowError, EscrowInstance, EscrowSnapshot, EscrowState, EscrowTerms,
};
pub use events::EscrowEvent;
pub use factory::{
    AddressFormat, EscrowFactory, FactoryIdentity, ImplementationCode, InstanceAddress, LedgerAddress,
};
pub use interface::{LedgerError, LedgerInterface, Receipt};
pub use timelocks::{LegKind, LegPhase, LegPolicy};
