// Types shared by the swap coordinator and its callers

use crate::commitment::merkle::MerkleError;
use crate::config::SwapConfig;
use crate::data_structures::{AccountId, AssetId, Balance, Salt, Timestamp};
use crate::onchain::escrow_contract::{EscrowSnapshot, EscrowState};
use crate::onchain::interface::LedgerError;
use crate::onchain::timelocks::{LegKind, LegPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("{leg} ledger rejected {call}: {source}")]
    Ledger {
        leg: LegKind,
        call: &'static str,
        source: LedgerError,
    },
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("{0} leg is not open")]
    LegNotOpen(LegKind),
    #[error("legs disagree: {0}")]
    LegMismatch(String),
    #[error("part {0} has not been revealed on the destination leg")]
    NotRevealed(u32),
}

/// One intent: what each side deposits, and where.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOrder {
    pub salt: Salt,
    // Maker funds the source leg and receives on the destination ledger
    pub maker_src: AccountId,
    pub maker_dst: AccountId,
    // Resolver funds the destination leg and receives on the source ledger
    pub resolver_src: AccountId,
    pub resolver_dst: AccountId,
    pub src_asset: AssetId,
    pub src_amount: Balance,
    pub dst_asset: AssetId,
    pub dst_amount: Balance,
    pub parts_count: u32,
    pub src_safety_deposit: Balance,
    pub dst_safety_deposit: Balance,
}

impl SwapOrder {
    pub fn validate(&self, src_chain: u64, dst_chain: u64) -> Result<(), CoordinatorError> {
        if self.parts_count == 0 {
            return Err(CoordinatorError::InvalidOrder("parts_count must be at least 1".into()));
        }
        if self.src_amount == 0 || self.dst_amount == 0 {
            return Err(CoordinatorError::InvalidOrder("amounts must be positive".into()));
        }
        let on_source = [&self.maker_src.chain_id, &self.resolver_src.chain_id, &self.src_asset.chain_id];
        let on_destination = [&self.maker_dst.chain_id, &self.resolver_dst.chain_id, &self.dst_asset.chain_id];
        if on_source.iter().any(|chain| **chain != src_chain) {
            return Err(CoordinatorError::InvalidOrder(format!(
                "source accounts and asset must live on chain {}",
                src_chain
            )));
        }
        if on_destination.iter().any(|chain| **chain != dst_chain) {
            return Err(CoordinatorError::InvalidOrder(format!(
                "destination accounts and asset must live on chain {}",
                dst_chain
            )));
        }
        Ok(())
    }
}

/// Absolute lock boundaries for both legs of one swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPlan {
    pub source: LegPolicy,
    pub destination: LegPolicy,
    pub reaction_margin: u64,
}

impl SwapPlan {
    /// Lays out the locks of both legs from `start`, using the configured delays.
    pub fn from_config(config: &SwapConfig, start: Timestamp) -> Result<Self, CoordinatorError> {
        let at = |delay: std::time::Duration| start.saturating_add(delay.as_secs());
        Self::new(
            LegPolicy::source(at(config.finality_delay), at(config.src_cancel_delay)),
            LegPolicy::destination(
                at(config.finality_delay),
                at(config.dst_exclusive_delay),
                at(config.dst_cancel_delay),
            ),
            config.reaction_margin.as_secs(),
        )
    }

    pub fn new(source: LegPolicy, destination: LegPolicy, reaction_margin: u64) -> Result<Self, CoordinatorError> {
        let plan = SwapPlan { source, destination, reaction_margin };
        plan.validate()?;
        Ok(plan)
    }

    /// Both legs well-formed, and the destination expires early enough that a
    /// secret revealed there can still be replayed before the source cancels.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.source.kind() != LegKind::Source || self.destination.kind() != LegKind::Destination {
            return Err(CoordinatorError::InvalidPlan("legs are swapped".into()));
        }
        self.source
            .validate()
            .and_then(|_| self.destination.validate())
            .map_err(|err| CoordinatorError::InvalidPlan(err.to_string()))?;

        let latest_reveal = self.destination.cancel_lock().saturating_add(self.reaction_margin);
        if latest_reveal > self.source.cancel_lock() {
            return Err(CoordinatorError::InvalidPlan(format!(
                "dst cancel {} + margin {} exceeds src cancel {}",
                self.destination.cancel_lock(),
                self.reaction_margin,
                self.source.cancel_lock()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapOutcome {
    /// At least one leg can still change.
    Pending,
    Completed,
    PartiallyFilled {
        source_parts: Vec<u32>,
        destination_parts: Vec<u32>,
    },
    /// Both legs ended with nothing released.
    Refunded,
}

impl SwapOutcome {
    pub fn from_legs(source: Option<&EscrowSnapshot>, destination: Option<&EscrowSnapshot>) -> Self {
        let (source, destination) = match (source, destination) {
            (Some(src), Some(dst)) => (src, dst),
            // A source leg refunded before the destination was opened
            (Some(src), None) if src.state == EscrowState::Cancelled && src.claimed_parts.is_empty() => {
                return SwapOutcome::Refunded
            }
            _ => return SwapOutcome::Pending,
        };
        if !(source.state.is_terminal() && destination.state.is_terminal()) {
            return SwapOutcome::Pending;
        }
        if source.state == EscrowState::FullyClaimed && destination.state == EscrowState::FullyClaimed {
            return SwapOutcome::Completed;
        }
        if source.claimed_parts.is_empty() && destination.claimed_parts.is_empty() {
            return SwapOutcome::Refunded;
        }
        SwapOutcome::PartiallyFilled {
            source_parts: source.claimed_parts.clone(),
            destination_parts: destination.claimed_parts.clone(),
        }
    }
}

/// Point-in-time view of both legs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SwapStatus {
    pub source: Option<EscrowSnapshot>,
    pub destination: Option<EscrowSnapshot>,
    pub outcome: SwapOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::factory::InstanceAddress;
    use ethers::types::H256;

    fn snapshot(kind: LegKind, state: EscrowState, claimed_parts: Vec<u32>) -> EscrowSnapshot {
        EscrowSnapshot {
            address: InstanceAddress(H256::zero()),
            kind,
            state,
            terms: None,
            claimed_parts,
            balance: 0,
            safety_deposit_held: 0,
        }
    }

    #[test]
    fn plan_from_default_config() {
        let plan = SwapPlan::from_config(&SwapConfig::default(), 1_000).unwrap();
        assert_eq!(plan.source, LegPolicy::source(1_012, 1_600));
        assert_eq!(plan.destination, LegPolicy::destination(1_012, 1_060, 1_300));
        assert_eq!(plan.reaction_margin, 120);
    }

    #[test]
    fn plan_rejects_destination_outliving_source() {
        let err = SwapPlan::new(LegPolicy::source(10, 100), LegPolicy::destination(10, 30, 90), 20).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidPlan(_)));
        assert!(SwapPlan::new(LegPolicy::source(10, 100), LegPolicy::destination(10, 30, 80), 20).is_ok());
    }

    #[test]
    fn plan_rejects_swapped_or_malformed_legs() {
        assert!(SwapPlan::new(LegPolicy::destination(10, 30, 80), LegPolicy::source(10, 100), 0).is_err());
        assert!(SwapPlan::new(LegPolicy::source(10, 100), LegPolicy::destination(40, 30, 80), 0).is_err());
    }

    #[test]
    fn outcome_from_legs() {
        use crate::onchain::escrow_contract::EscrowState::*;
        let src = |state, parts| snapshot(LegKind::Source, state, parts);
        let dst = |state, parts| snapshot(LegKind::Destination, state, parts);

        assert_eq!(SwapOutcome::from_legs(None, None), SwapOutcome::Pending);
        assert_eq!(
            SwapOutcome::from_legs(Some(&src(Active, vec![0])), Some(&dst(FullyClaimed, vec![0, 1]))),
            SwapOutcome::Pending
        );
        assert_eq!(
            SwapOutcome::from_legs(Some(&src(FullyClaimed, vec![0, 1])), Some(&dst(FullyClaimed, vec![0, 1]))),
            SwapOutcome::Completed
        );
        assert_eq!(
            SwapOutcome::from_legs(Some(&src(Cancelled, vec![0])), Some(&dst(Cancelled, vec![0]))),
            SwapOutcome::PartiallyFilled { source_parts: vec![0], destination_parts: vec![0] }
        );
        assert_eq!(
            SwapOutcome::from_legs(Some(&src(Cancelled, vec![])), Some(&dst(Cancelled, vec![]))),
            SwapOutcome::Refunded
        );
        assert_eq!(SwapOutcome::from_legs(Some(&src(Cancelled, vec![])), None), SwapOutcome::Refunded);
    }
}
