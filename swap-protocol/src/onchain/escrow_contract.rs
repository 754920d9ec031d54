//! Escrow instance: the claim/refund state machine shared by both swap legs.
//!
//! An instance is created empty by the factory, initialized once by its funder,
//! then moves through zero or more part releases until either every part is
//! claimed or the funder refunds the rest. Every operation validates completely
//! before touching state, so a rejected call leaves the instance unchanged. Fund
//! movements are not performed here: successful calls return a [`Settlement`]
//! that the ledger applies in the same step.

use crate::commitment::merkle::{leaf_for, verify, MerkleProof};
use crate::data_structures::{AccountId, AssetId, Balance, Hash, Salt, Secret, Timestamp};
use crate::onchain::events::EscrowEvent;
use crate::onchain::factory::InstanceAddress;
use crate::onchain::timelocks::{LegKind, LegPhase, LegPolicy};
use bitvec::vec::BitVec;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("escrow already initialized")]
    AlreadyInitialized,
    #[error("escrow not initialized")]
    NotInitialized,
    #[error("too early: window opens at {opens_at}, now {now}")]
    TooEarly { now: Timestamp, opens_at: Timestamp },
    #[error("too late: window closed at {closed_at}, now {now}")]
    TooLate { now: Timestamp, closed_at: Timestamp },
    #[error("part {0} already claimed")]
    AlreadyClaimed(u32),
    #[error("invalid proof for part {0}")]
    InvalidProof(u32),
    #[error("escrow already refunded")]
    AlreadyRefunded,
    #[error("nothing left to refund")]
    NothingToRefund,
    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: AccountId, action: &'static str },
    #[error("instance {0} already deployed")]
    AlreadyDeployed(InstanceAddress),
    #[error("part index {index} out of range for {parts_count} parts")]
    InvalidPartIndex { index: u32, parts_count: u32 },
    #[error("invalid escrow parameters: {0}")]
    InvalidParameters(String),
    #[error("operation is only valid on a {expected} escrow, this one is {actual}")]
    WrongLeg { expected: LegKind, actual: LegKind },
}

// Calls that can be submitted to a ledger hosting escrow instances
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowCall {
    // Factory deploys an empty instance at the salt's predicted address
    Create {
        kind: LegKind,
        salt: Salt,
    },
    // Funder sets the immutable terms and moves amount + safety deposit into custody
    Init {
        instance: InstanceAddress,
        terms: EscrowTerms,
    },
    // Source: counterparty claims one part
    ClaimPart {
        instance: InstanceAddress,
        part_index: u32,
        secret: Secret,
        proof: Vec<Hash>,
    },
    // Source: resolver collects the share it already revealed on the destination leg
    WithdrawToResolver {
        instance: InstanceAddress,
        part_index: u32,
        secret: Secret,
        proof: Vec<Hash>,
    },
    // Destination: releases one part to the maker
    Withdraw {
        instance: InstanceAddress,
        part_index: u32,
        secret: Secret,
        proof: Vec<Hash>,
    },
    Refund {
        instance: InstanceAddress,
    },
}

impl EscrowCall {
    pub fn name(&self) -> &'static str {
        match self {
            EscrowCall::Create { .. } => "create",
            EscrowCall::Init { .. } => "init",
            EscrowCall::ClaimPart { .. } => "claim_part",
            EscrowCall::WithdrawToResolver { .. } => "withdraw_to_resolver",
            EscrowCall::Withdraw { .. } => "withdraw",
            EscrowCall::Refund { .. } => "refund",
        }
    }

    /// Target instance; `None` for `Create`, which addresses the factory.
    pub fn instance(&self) -> Option<InstanceAddress> {
        match self {
            EscrowCall::Create { .. } => None,
            EscrowCall::Init { instance, .. }
            | EscrowCall::ClaimPart { instance, .. }
            | EscrowCall::WithdrawToResolver { instance, .. }
            | EscrowCall::Withdraw { instance, .. }
            | EscrowCall::Refund { instance } => Some(*instance),
        }
    }
}

/// Who is calling, and the ledger time the call executes at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub caller: AccountId,
    pub now: Timestamp,
}

impl CallContext {
    pub fn new(caller: AccountId, now: Timestamp) -> Self {
        CallContext { caller, now }
    }
}

/// Upper bound on `parts_count`; the claimed-part mask is allocated up front.
pub const MAX_PARTS_COUNT: u32 = 1 << 16;

/// Immutable parameters fixed by `init`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTerms {
    pub maker: AccountId,
    pub counterparty: AccountId,
    pub asset: AssetId,
    pub amount: Balance,
    pub commitment_root: Hash,
    pub parts_count: u32,
    pub policy: LegPolicy,
    // Paid in the ledger's native asset to whoever executes the terminal transition
    pub safety_deposit: Balance,
}

impl EscrowTerms {
    pub fn validate(&self) -> Result<(), EscrowError> {
        if self.parts_count == 0 {
            return Err(EscrowError::InvalidParameters("parts count must be at least 1".into()));
        }
        if self.parts_count > MAX_PARTS_COUNT {
            return Err(EscrowError::InvalidParameters(format!(
                "parts count {} exceeds {}",
                self.parts_count, MAX_PARTS_COUNT
            )));
        }
        if self.amount == 0 {
            return Err(EscrowError::InvalidParameters("amount must be positive".into()));
        }
        if self.maker == self.counterparty {
            return Err(EscrowError::InvalidParameters(
                "maker and counterparty must differ".into(),
            ));
        }
        self.policy.validate()
    }

    /// Source legs are funded by the maker, destination legs by the resolver.
    pub fn funder(&self) -> &AccountId {
        match self.policy.kind() {
            LegKind::Source => &self.maker,
            LegKind::Destination => &self.counterparty,
        }
    }

    /// Source releases pay the resolver; destination releases pay the maker.
    pub fn release_recipient(&self) -> &AccountId {
        match self.policy.kind() {
            LegKind::Source => &self.counterparty,
            LegKind::Destination => &self.maker,
        }
    }

    pub fn part_amount(&self, part_index: u32) -> Balance {
        part_amount(self.amount, self.parts_count, part_index)
    }
}

/// Equal shares; the last part absorbs the division remainder.
pub fn part_amount(amount: Balance, parts_count: u32, part_index: u32) -> Balance {
    if parts_count == 0 || part_index >= parts_count {
        return 0;
    }
    let parts = Balance::from(parts_count);
    let share = amount / parts;
    if part_index == parts_count - 1 {
        amount - share * (parts - 1)
    } else {
        share
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowState {
    Uninitialized,
    Active,
    FullyClaimed,
    Cancelled,
}

impl EscrowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowState::FullyClaimed | EscrowState::Cancelled)
    }
}

/// Which funds a payout draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Funds {
    Escrowed,
    SafetyDeposit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payout {
    pub recipient: AccountId,
    pub funds: Funds,
    pub amount: Balance,
}

/// Transfers a successful call authorizes, plus the event it emits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub payouts: Vec<Payout>,
    pub event: EscrowEvent,
}

/// Read-only view of an instance for observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSnapshot {
    pub address: InstanceAddress,
    pub kind: LegKind,
    pub state: EscrowState,
    pub terms: Option<EscrowTerms>,
    pub claimed_parts: Vec<u32>,
    pub balance: Balance,
    pub safety_deposit_held: Balance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReleaseRoute {
    ClaimPart,
    ResolverWithdrawal,
    MakerWithdrawal,
}

impl ReleaseRoute {
    fn leg(self) -> LegKind {
        match self {
            ReleaseRoute::ClaimPart | ReleaseRoute::ResolverWithdrawal => LegKind::Source,
            ReleaseRoute::MakerWithdrawal => LegKind::Destination,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EscrowInstance {
    address: InstanceAddress,
    kind: LegKind,
    terms: Option<EscrowTerms>,
    claimed: BitVec,
    refunded: bool,
    balance: Balance,
    deposit_held: Balance,
}

impl EscrowInstance {
    /// Empty, uninitialized instance as deployed by the factory.
    pub fn new(address: InstanceAddress, kind: LegKind) -> Self {
        EscrowInstance {
            address,
            kind,
            terms: None,
            claimed: BitVec::new(),
            refunded: false,
            balance: 0,
            deposit_held: 0,
        }
    }

    pub fn address(&self) -> InstanceAddress {
        self.address
    }

    pub fn kind(&self) -> LegKind {
        self.kind
    }

    pub fn terms(&self) -> Option<&EscrowTerms> {
        self.terms.as_ref()
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn safety_deposit_held(&self) -> Balance {
        self.deposit_held
    }

    pub fn is_claimed(&self, part_index: u32) -> bool {
        self.claimed.get(part_index as usize).map(|bit| *bit).unwrap_or(false)
    }

    pub fn claimed_parts(&self) -> Vec<u32> {
        self.claimed.iter_ones().map(|index| index as u32).collect()
    }

    pub fn state(&self) -> EscrowState {
        if self.terms.is_none() {
            EscrowState::Uninitialized
        } else if self.refunded {
            EscrowState::Cancelled
        } else if self.claimed.all() {
            EscrowState::FullyClaimed
        } else {
            EscrowState::Active
        }
    }

    pub fn phase(&self, now: Timestamp) -> Option<LegPhase> {
        self.terms.as_ref().map(|terms| terms.policy.phase(now))
    }

    pub fn snapshot(&self) -> EscrowSnapshot {
        EscrowSnapshot {
            address: self.address,
            kind: self.kind,
            state: self.state(),
            terms: self.terms.clone(),
            claimed_parts: self.claimed_parts(),
            balance: self.balance,
            safety_deposit_held: self.deposit_held,
        }
    }

    /// One-shot initialization by the leg's funder. The ledger moves
    /// `amount` and `safety_deposit` into custody alongside this call.
    pub fn init(&mut self, ctx: &CallContext, terms: EscrowTerms) -> Result<(), EscrowError> {
        if self.terms.is_some() {
            return Err(EscrowError::AlreadyInitialized);
        }
        if terms.policy.kind() != self.kind {
            return Err(EscrowError::WrongLeg { expected: self.kind, actual: terms.policy.kind() });
        }
        terms.validate()?;
        if &ctx.caller != terms.funder() {
            return Err(EscrowError::Unauthorized { caller: ctx.caller.clone(), action: "init" });
        }

        debug!(
            "Escrow {}: initialized by {} with {} {} in {} parts, {}",
            self.address, ctx.caller, terms.amount, terms.asset, terms.parts_count, terms.policy
        );
        self.claimed = BitVec::repeat(false, terms.parts_count as usize);
        self.balance = terms.amount;
        self.deposit_held = terms.safety_deposit;
        self.terms = Some(terms);
        Ok(())
    }

    pub fn claim_part(
        &mut self,
        ctx: &CallContext,
        proof: &[Hash],
        secret: &Secret,
        part_index: u32,
    ) -> Result<Settlement, EscrowError> {
        self.release(ctx, ReleaseRoute::ClaimPart, part_index, secret, proof)
    }

    pub fn withdraw_to_resolver(
        &mut self,
        ctx: &CallContext,
        secret: &Secret,
        part_index: u32,
        proof: &[Hash],
    ) -> Result<Settlement, EscrowError> {
        self.release(ctx, ReleaseRoute::ResolverWithdrawal, part_index, secret, proof)
    }

    pub fn withdraw(
        &mut self,
        ctx: &CallContext,
        secret: &Secret,
        part_index: u32,
        proof: &[Hash],
    ) -> Result<Settlement, EscrowError> {
        self.release(ctx, ReleaseRoute::MakerWithdrawal, part_index, secret, proof)
    }

    fn release(
        &mut self,
        ctx: &CallContext,
        route: ReleaseRoute,
        part_index: u32,
        secret: &Secret,
        siblings: &[Hash],
    ) -> Result<Settlement, EscrowError> {
        let terms = self.terms.as_ref().ok_or(EscrowError::NotInitialized)?;
        if route.leg() != self.kind {
            return Err(EscrowError::WrongLeg { expected: route.leg(), actual: self.kind });
        }
        if self.refunded {
            return Err(EscrowError::AlreadyRefunded);
        }
        if part_index >= terms.parts_count {
            return Err(EscrowError::InvalidPartIndex { index: part_index, parts_count: terms.parts_count });
        }
        if self.is_claimed(part_index) {
            return Err(EscrowError::AlreadyClaimed(part_index));
        }
        terms.policy.check_release(ctx.now, &ctx.caller, &terms.counterparty)?;

        let proof = MerkleProof::new(part_index, terms.parts_count, siblings.to_vec());
        if !verify(&leaf_for(part_index, secret), &proof, &terms.commitment_root) {
            return Err(EscrowError::InvalidProof(part_index));
        }

        let amount = terms.part_amount(part_index);
        let remaining = self.balance.checked_sub(amount).ok_or_else(|| {
            EscrowError::InvalidParameters(format!(
                "custody {} below part amount {}",
                self.balance, amount
            ))
        })?;
        let recipient = terms.release_recipient().clone();

        // All checks passed: commit mask and balance together
        self.claimed.set(part_index as usize, true);
        self.balance = remaining;

        let mut payouts = vec![Payout { recipient: recipient.clone(), funds: Funds::Escrowed, amount }];
        if self.claimed.all() {
            payouts.extend(self.take_deposit(&ctx.caller));
        }
        debug!(
            "Escrow {}: part {} released to {} ({} left, {:?})",
            self.address,
            part_index,
            recipient,
            self.balance,
            self.state()
        );

        Ok(Settlement {
            payouts,
            event: EscrowEvent::PartClaimed {
                instance: self.address,
                part_index,
                claimant: ctx.caller.clone(),
                recipient,
                amount,
                secret: *secret,
            },
        })
    }

    /// Returns the unclaimed balance to the funder once the cancel lock has passed.
    pub fn refund(&mut self, ctx: &CallContext) -> Result<Settlement, EscrowError> {
        let terms = self.terms.as_ref().ok_or(EscrowError::NotInitialized)?;
        let funder = terms.funder().clone();
        if ctx.caller != funder {
            return Err(EscrowError::Unauthorized { caller: ctx.caller.clone(), action: "refund" });
        }
        if self.refunded {
            return Err(EscrowError::AlreadyRefunded);
        }
        if self.claimed.all() {
            return Err(EscrowError::NothingToRefund);
        }
        terms.policy.check_refund(ctx.now)?;

        let remaining = self.balance;
        self.balance = 0;
        self.refunded = true;

        // Zero-valued parts can leave unclaimed indices with nothing escrowed
        let mut payouts: Vec<Payout> = (remaining > 0)
            .then(|| Payout { recipient: funder.clone(), funds: Funds::Escrowed, amount: remaining })
            .into_iter()
            .collect();
        payouts.extend(self.take_deposit(&ctx.caller));
        debug!("Escrow {}: refunded {} to {}", self.address, remaining, funder);

        Ok(Settlement {
            payouts,
            event: EscrowEvent::Refunded { instance: self.address, remaining, recipient: funder },
        })
    }

    fn take_deposit(&mut self, executor: &AccountId) -> Option<Payout> {
        let amount = std::mem::take(&mut self.deposit_held);
        (amount > 0).then(|| Payout {
            recipient: executor.clone(),
            funds: Funds::SafetyDeposit,
            amount,
        })
    }
}
