// swap-protocol/tests/escrow_scenarios.rs
// Escrow behaviour observed through a ledger: funds, timing windows, idempotence.

use ethers::types::H256;
use std::sync::Arc;
use swap_protocol::{
    commitment::SecretSet,
    data_structures::{AccountId, AssetId, Balance, Timestamp},
    onchain::{
        ChainSimulator, EscrowCall, EscrowError, EscrowEvent, EscrowState, EscrowTerms, InstanceAddress,
        LedgerError, LedgerInterface, LegKind, LegPolicy, SimulatedLedger,
    },
    test_utils::{evm_chain, seeded_secrets, substrate_chain, test_account, START},
};

const T: Timestamp = START;

fn token(chain_id: u64) -> AssetId {
    AssetId::token(chain_id, "TOK", "0x00000000000000000000000000000000000000aa")
}

struct Leg {
    chain: ChainSimulator,
    instance: InstanceAddress,
    maker: AccountId,
    resolver: AccountId,
    asset: AssetId,
}

impl Leg {
    fn balance(&self, account: &AccountId) -> Balance {
        self.chain.get_balance(account, &self.asset)
    }

    fn custody(&self) -> Balance {
        self.balance(&self.chain.custody_account(&self.instance))
    }

    fn state(&self) -> EscrowState {
        self.chain.snapshot(&self.instance).unwrap().state
    }

    fn at(&mut self, now: Timestamp) -> &mut Self {
        self.chain.set_time(now);
        self
    }

    fn claim(&mut self, caller: &AccountId, set: &SecretSet, part_index: u32) -> Result<(), LedgerError> {
        let (secret, proof) = set.claim_material(part_index).unwrap();
        let call = match self.chain.snapshot(&self.instance).unwrap().kind {
            LegKind::Source => EscrowCall::ClaimPart { instance: self.instance, part_index, secret, proof },
            LegKind::Destination => EscrowCall::Withdraw { instance: self.instance, part_index, secret, proof },
        };
        self.chain.execute(caller, call).map(|_| ())
    }

    fn refund(&mut self, caller: &AccountId) -> Result<(), LedgerError> {
        self.chain.execute(caller, EscrowCall::Refund { instance: self.instance }).map(|_| ())
    }
}

// Creates and funds one leg; the source is funded by the maker, the destination by the resolver
fn open_leg(mut chain: ChainSimulator, set: &SecretSet, amount: Balance, policy: LegPolicy) -> Leg {
    let chain_id = chain.chain_id;
    let maker = test_account(chain_id, "maker");
    let resolver = test_account(chain_id, "resolver");
    let asset = token(chain_id);
    let funder = match policy.kind() {
        LegKind::Source => maker.clone(),
        LegKind::Destination => resolver.clone(),
    };
    chain.mint(&funder, &asset, amount).unwrap();
    let native = chain.native_asset().clone();
    chain.mint(&funder, &native, 50).unwrap();

    let salt = H256::from_low_u64_be(42);
    let predicted = chain.predict(policy.kind(), &salt);
    let receipt = chain.execute(&funder, EscrowCall::Create { kind: policy.kind(), salt }).unwrap();
    assert_eq!(receipt.created_instance(), Some(predicted));
    assert_eq!(chain.predict(policy.kind(), &salt), predicted);

    let terms = EscrowTerms {
        maker: maker.clone(),
        counterparty: resolver.clone(),
        asset: asset.clone(),
        amount,
        commitment_root: set.root(),
        parts_count: set.parts_count(),
        policy,
        safety_deposit: 10,
    };
    chain.execute(&funder, EscrowCall::Init { instance: predicted, terms }).unwrap();
    Leg { chain, instance: predicted, maker, resolver, asset }
}

#[test]
fn four_parts_claimed_in_order() {
    let set = seeded_secrets(4, 1);
    let mut leg = open_leg(evm_chain(1, "ETH"), &set, 100, LegPolicy::source(T + 10, T + 20));
    let resolver = leg.resolver.clone();
    leg.at(T + 15);

    for i in 0..4 {
        leg.claim(&resolver, &set, i).unwrap();
    }
    assert_eq!(leg.custody(), 0);
    assert_eq!(leg.balance(&resolver), 100);
    assert_eq!(leg.state(), EscrowState::FullyClaimed);
    assert_eq!(
        leg.claim(&resolver, &set, 0).unwrap_err(),
        LedgerError::Escrow(EscrowError::AlreadyClaimed(0))
    );
}

#[test]
fn source_timing_and_partial_refund() {
    let set = seeded_secrets(4, 2);
    let mut leg = open_leg(evm_chain(1, "ETH"), &set, 100, LegPolicy::source(T + 10, T + 20));
    let (maker, resolver) = (leg.maker.clone(), leg.resolver.clone());

    assert_eq!(
        leg.at(T + 5).claim(&resolver, &set, 0).unwrap_err(),
        LedgerError::Escrow(EscrowError::TooEarly { now: T + 5, opens_at: T + 10 })
    );
    for i in 0..3 {
        leg.at(T + 15).claim(&resolver, &set, i).unwrap();
    }
    assert!(matches!(
        leg.refund(&maker),
        Err(LedgerError::Escrow(EscrowError::TooEarly { .. }))
    ));

    leg.at(T + 21).refund(&maker).unwrap();
    assert_eq!(leg.balance(&maker), 25);
    assert_eq!(leg.balance(&resolver), 75);
    assert_eq!(leg.state(), EscrowState::Cancelled);
    assert_eq!(
        leg.chain.events_for(&leg.instance).last(),
        Some(&EscrowEvent::Refunded { instance: leg.instance, remaining: 25, recipient: maker.clone() })
    );

    // Terminal: nothing else moves
    assert_eq!(
        leg.claim(&resolver, &set, 3).unwrap_err(),
        LedgerError::Escrow(EscrowError::AlreadyRefunded)
    );
}

#[test]
fn destination_exclusive_window() {
    let set = seeded_secrets(2, 3);
    let mut leg = open_leg(
        substrate_chain(2, "DOT"),
        &set,
        60,
        LegPolicy::destination(T + 10, T + 30, T + 60),
    );
    let maker = leg.maker.clone();
    let stranger = test_account(2, "stranger");

    assert!(matches!(
        leg.at(T + 25).claim(&stranger, &set, 0),
        Err(LedgerError::Escrow(EscrowError::Unauthorized { .. }))
    ));
    leg.at(T + 31).claim(&stranger, &set, 0).unwrap();
    assert_eq!(leg.balance(&maker), 30);
    assert_eq!(leg.balance(&stranger), 0);

    assert_eq!(
        leg.at(T + 60).claim(&stranger, &set, 1).unwrap_err(),
        LedgerError::Escrow(EscrowError::TooLate { now: T + 60, closed_at: T + 60 })
    );
    let resolver = leg.resolver.clone();
    leg.refund(&resolver).unwrap();
    assert_eq!(leg.balance(&resolver), 30);
}

#[test]
fn refund_after_full_claim_moves_nothing() {
    let set = seeded_secrets(3, 4);
    let mut leg = open_leg(evm_chain(1, "ETH"), &set, 99, LegPolicy::source(T + 10, T + 20));
    let (maker, resolver) = (leg.maker.clone(), leg.resolver.clone());
    for i in [2, 0, 1] {
        leg.at(T + 12).claim(&resolver, &set, i).unwrap();
    }
    let native = leg.chain.native_asset().clone();
    let maker_native = leg.chain.get_balance(&maker, &native);
    let blocks = leg.chain.block_number();

    assert_eq!(
        leg.at(T + 30).refund(&maker).unwrap_err(),
        LedgerError::Escrow(EscrowError::NothingToRefund)
    );
    assert_eq!(leg.balance(&maker), 0);
    assert_eq!(leg.chain.get_balance(&maker, &native), maker_native);
    assert_eq!(leg.chain.block_number(), blocks);
    assert_eq!(leg.state(), EscrowState::FullyClaimed);
}

#[test]
fn refund_frees_deposit_when_remaining_parts_are_worthless() {
    let set = seeded_secrets(4, 9);
    let mut leg = open_leg(evm_chain(1, "ETH"), &set, 1, LegPolicy::source(T + 10, T + 20));
    let (maker, resolver) = (leg.maker.clone(), leg.resolver.clone());
    let native = leg.chain.native_asset().clone();
    let custody = leg.chain.custody_account(&leg.instance);

    leg.at(T + 15).claim(&resolver, &set, 3).unwrap();
    assert_eq!(leg.custody(), 0);
    assert_eq!(leg.state(), EscrowState::Active);

    leg.at(T + 21).refund(&maker).unwrap();
    assert_eq!(leg.state(), EscrowState::Cancelled);
    assert_eq!(leg.chain.get_balance(&custody, &native), 0);
    assert_eq!(leg.chain.get_balance(&maker, &native), 50);
    assert_eq!(
        leg.chain.events_for(&leg.instance).last(),
        Some(&EscrowEvent::Refunded { instance: leg.instance, remaining: 0, recipient: maker.clone() })
    );
}

#[test]
fn safety_deposit_goes_to_final_executor() {
    let set = seeded_secrets(2, 5);
    let mut leg = open_leg(substrate_chain(2, "DOT"), &set, 10, LegPolicy::destination(T + 10, T + 30, T + 60));
    let native = leg.chain.native_asset().clone();
    let (resolver, stranger) = (leg.resolver.clone(), test_account(2, "stranger"));

    leg.at(T + 20).claim(&resolver, &set, 0).unwrap();
    leg.at(T + 40).claim(&stranger, &set, 1).unwrap();
    assert_eq!(leg.chain.get_balance(&stranger, &native), 10);
    assert_eq!(leg.chain.get_balance(&resolver, &native), 40);
}

#[test]
fn one_commitment_serves_both_ledger_formats() {
    let set = seeded_secrets(5, 6);
    let mut src = open_leg(evm_chain(1, "ETH"), &set, 50, LegPolicy::source(T + 10, T + 200));
    let mut dst = open_leg(substrate_chain(2, "DOT"), &set, 500, LegPolicy::destination(T + 10, T + 30, T + 60));
    let src_resolver = src.resolver.clone();
    let dst_resolver = dst.resolver.clone();

    for i in 0..5 {
        dst.at(T + 11).claim(&dst_resolver, &set, i).unwrap();
        src.at(T + 11).claim(&src_resolver, &set, i).unwrap();
    }
    assert_eq!(src.state(), EscrowState::FullyClaimed);
    assert_eq!(dst.state(), EscrowState::FullyClaimed);
    // 20-byte vs 32-byte custody accounts
    assert_eq!(src.chain.custody_account(&src.instance).address.len(), 42);
    assert_eq!(dst.chain.custody_account(&dst.instance).address.len(), 66);
}

#[tokio::test]
async fn concurrent_duplicate_claims_pay_once() {
    let set = seeded_secrets(4, 7);
    let leg = open_leg(evm_chain(1, "ETH"), &set, 100, LegPolicy::source(T + 10, T + 20));
    let (instance, resolver, asset) = (leg.instance, leg.resolver.clone(), leg.asset.clone());
    let mut chain = leg.chain;
    chain.set_time(T + 15);
    let ledger = Arc::new(SimulatedLedger::new(chain));

    let (secret, proof) = set.claim_material(1).unwrap();
    let attempts = (0..16).map(|i| {
        let ledger = ledger.clone();
        let caller = resolver.clone();
        let call = if i % 2 == 0 {
            EscrowCall::ClaimPart { instance, part_index: 1, secret, proof: proof.clone() }
        } else {
            EscrowCall::WithdrawToResolver { instance, part_index: 1, secret, proof: proof.clone() }
        };
        tokio::spawn(async move { ledger.submit(caller, call).await })
    });
    let results = futures::future::join_all(attempts).await;

    let succeeded = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    assert_eq!(succeeded, 1);
    for result in results {
        if let Ok(Err(err)) = result {
            assert_eq!(err, LedgerError::Escrow(EscrowError::AlreadyClaimed(1)));
        }
    }
    assert_eq!(ledger.balance(resolver, asset).await, 25);
    assert_eq!(ledger.instance(instance).await.unwrap().claimed_parts, vec![1]);
}

#[test]
fn salt_reuse_is_rejected_by_the_ledger() {
    let set = seeded_secrets(1, 8);
    let mut leg = open_leg(evm_chain(1, "ETH"), &set, 1, LegPolicy::source(T + 10, T + 20));
    let maker = leg.maker.clone();
    let err = leg
        .chain
        .execute(&maker, EscrowCall::Create { kind: LegKind::Source, salt: H256::from_low_u64_be(42) })
        .unwrap_err();
    assert_eq!(err, LedgerError::Escrow(EscrowError::AlreadyDeployed(leg.instance)));
}
