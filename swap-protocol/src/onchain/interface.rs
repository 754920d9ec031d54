use crate::data_structures::{AccountId, AssetId, Balance, Salt, Timestamp};
use crate::onchain::escrow_contract::{EscrowCall, EscrowError, EscrowSnapshot};
use crate::onchain::events::EscrowEvent;
use crate::onchain::factory::InstanceAddress;
use crate::onchain::timelocks::LegKind;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

// Failures of a ledger call. Escrow rejections are wrapped unchanged so callers
// can match on the protocol error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error("no escrow instance at {0}")]
    UnknownInstance(InstanceAddress),
    #[error("{account} holds {available} {asset}, needs {needed}")]
    InsufficientFunds {
        account: AccountId,
        asset: AssetId,
        needed: Balance,
        available: Balance,
    },
    #[error("balance overflow crediting {asset} to {account}")]
    BalanceOverflow { account: AccountId, asset: AssetId },
    #[error("ledger {expected} cannot accept {what} from chain {actual}")]
    WrongChain {
        expected: u64,
        actual: u64,
        what: &'static str,
    },
}

impl LedgerError {
    /// The escrow-level rejection, if that is what this is.
    pub fn escrow_error(&self) -> Option<&EscrowError> {
        match self {
            LedgerError::Escrow(err) => Some(err),
            _ => None,
        }
    }
}

// Result of a successfully mined call
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub chain_id: u64,
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub call: &'static str,
    pub events: Vec<EscrowEvent>,
}

impl Receipt {
    /// Address announced by a `Create` call.
    pub fn created_instance(&self) -> Option<InstanceAddress> {
        self.events.iter().find_map(|event| match event {
            EscrowEvent::InstanceCreated { address, .. } => Some(*address),
            _ => None,
        })
    }
}

/// Everything the coordinator needs from one ledger.
///
/// Calls are processed one at a time per ledger; a rejected call changes nothing.
#[async_trait]
pub trait LedgerInterface: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Asset safety deposits are paid in.
    fn native_asset(&self) -> AssetId;

    async fn now(&self) -> Timestamp;

    /// Deterministic instance address for `salt`, whether or not it exists yet.
    async fn predict_instance(&self, kind: LegKind, salt: Salt) -> InstanceAddress;

    async fn submit(&self, caller: AccountId, call: EscrowCall) -> Result<Receipt, LedgerError>;

    async fn instance(&self, address: InstanceAddress) -> Result<EscrowSnapshot, LedgerError>;

    async fn balance(&self, account: AccountId, asset: AssetId) -> Balance;

    /// Events emitted by one instance, oldest first.
    async fn events(&self, instance: InstanceAddress) -> Vec<EscrowEvent>;
}
