//! Drives both legs of one swap in the order that keeps every party safe.
//!
//! The maker opens the source leg; the resolver mirrors it on the destination
//! leg with the same commitment root; each part's secret is revealed on the
//! destination leg first and only then replayed on the source leg. The secret
//! used on the source leg is read back from the destination ledger's events,
//! so a part can never be claimed on the source before it was paid out on the
//! destination.

use crate::commitment::merkle::MerkleTree;
use crate::commitment::secrets::SecretSet;
use crate::config::SwapConfig;
use crate::cross_chain::types::{CoordinatorError, SwapOrder, SwapOutcome, SwapPlan, SwapStatus};
use crate::data_structures::{AccountId, Hash, Secret};
use crate::onchain::escrow_contract::{EscrowCall, EscrowError, EscrowSnapshot, EscrowState, EscrowTerms};
use crate::onchain::events::EscrowEvent;
use crate::onchain::factory::InstanceAddress;
use crate::onchain::interface::{LedgerError, LedgerInterface, Receipt};
use crate::onchain::timelocks::LegKind;
use log::{info, warn};
use std::sync::Arc;

/// Refunds that went through during [`SwapCoordinator::recover`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recovery {
    pub source: Option<Receipt>,
    pub destination: Option<Receipt>,
}

pub struct SwapCoordinator {
    source: Arc<dyn LedgerInterface>,
    destination: Arc<dyn LedgerInterface>,
    order: SwapOrder,
    plan: SwapPlan,
    // Maker's secrets; only ever revealed one part at a time
    secrets: SecretSet,
    // Tree over the public leaves, enough for anyone to build proofs
    public_tree: MerkleTree,
    src_instance: InstanceAddress,
    dst_instance: InstanceAddress,
}

impl SwapCoordinator {
    pub async fn new(
        source: Arc<dyn LedgerInterface>,
        destination: Arc<dyn LedgerInterface>,
        order: SwapOrder,
        plan: SwapPlan,
        secrets: SecretSet,
    ) -> Result<Self, CoordinatorError> {
        order.validate(source.chain_id(), destination.chain_id())?;
        plan.validate()?;
        if secrets.parts_count() != order.parts_count {
            return Err(CoordinatorError::InvalidOrder(format!(
                "order has {} parts but {} secrets were generated",
                order.parts_count,
                secrets.parts_count()
            )));
        }
        let public_tree = MerkleTree::new(secrets.leaves().to_vec())?;
        let src_instance = source.predict_instance(LegKind::Source, order.salt).await;
        let dst_instance = destination.predict_instance(LegKind::Destination, order.salt).await;
        info!(
            "Coordinator: swap {} -> {} planned, src instance {}, dst instance {}, root {:?}",
            order.src_asset,
            order.dst_asset,
            src_instance,
            dst_instance,
            secrets.root()
        );

        Ok(SwapCoordinator {
            source,
            destination,
            order,
            plan,
            secrets,
            public_tree,
            src_instance,
            dst_instance,
        })
    }

    /// Plans the locks from the source ledger's current time.
    pub async fn with_config(
        source: Arc<dyn LedgerInterface>,
        destination: Arc<dyn LedgerInterface>,
        order: SwapOrder,
        config: &SwapConfig,
        secrets: SecretSet,
    ) -> Result<Self, CoordinatorError> {
        let plan = SwapPlan::from_config(config, source.now().await)?;
        Self::new(source, destination, order, plan, secrets).await
    }

    pub fn order(&self) -> &SwapOrder {
        &self.order
    }

    pub fn plan(&self) -> &SwapPlan {
        &self.plan
    }

    pub fn commitment_root(&self) -> Hash {
        self.secrets.root()
    }

    pub fn source_instance(&self) -> InstanceAddress {
        self.src_instance
    }

    pub fn destination_instance(&self) -> InstanceAddress {
        self.dst_instance
    }

    /// Maker deploys and funds the source escrow.
    pub async fn open_source_leg(&self) -> Result<InstanceAddress, CoordinatorError> {
        let maker = &self.order.maker_src;
        let receipt = self
            .submit(LegKind::Source, maker, EscrowCall::Create { kind: LegKind::Source, salt: self.order.salt })
            .await?;
        if receipt.created_instance() != Some(self.src_instance) {
            return Err(CoordinatorError::LegMismatch(format!(
                "source factory created {:?}, predicted {}",
                receipt.created_instance(),
                self.src_instance
            )));
        }

        let terms = EscrowTerms {
            maker: maker.clone(),
            counterparty: self.order.resolver_src.clone(),
            asset: self.order.src_asset.clone(),
            amount: self.order.src_amount,
            commitment_root: self.secrets.root(),
            parts_count: self.order.parts_count,
            policy: self.plan.source,
            safety_deposit: self.order.src_safety_deposit,
        };
        self.submit(LegKind::Source, maker, EscrowCall::Init { instance: self.src_instance, terms })
            .await?;
        info!("Coordinator: source leg {} funded with {} {}", self.src_instance, self.order.src_amount, self.order.src_asset);
        Ok(self.src_instance)
    }

    /// Resolver deploys and funds the destination escrow, once the source leg
    /// is live under the agreed root, part count and locks.
    pub async fn open_destination_leg(&self) -> Result<InstanceAddress, CoordinatorError> {
        let source = snapshot_of(self.source.as_ref(), self.src_instance)
            .await
            .map_err(|source| CoordinatorError::Ledger { leg: LegKind::Source, call: "snapshot", source })?
            .filter(|snapshot| snapshot.state == EscrowState::Active)
            .ok_or(CoordinatorError::LegNotOpen(LegKind::Source))?;
        let terms = source.terms.as_ref().ok_or(CoordinatorError::LegNotOpen(LegKind::Source))?;
        if terms.commitment_root != self.secrets.root() {
            return Err(CoordinatorError::LegMismatch(format!(
                "source root {:?} differs from {:?}",
                terms.commitment_root,
                self.secrets.root()
            )));
        }
        if terms.parts_count != self.order.parts_count {
            return Err(CoordinatorError::LegMismatch(format!(
                "source has {} parts, order has {}",
                terms.parts_count, self.order.parts_count
            )));
        }
        if terms.policy != self.plan.source {
            return Err(CoordinatorError::LegMismatch(format!(
                "source locks {} differ from plan {}",
                terms.policy, self.plan.source
            )));
        }

        let resolver = &self.order.resolver_dst;
        self.submit(
            LegKind::Destination,
            resolver,
            EscrowCall::Create { kind: LegKind::Destination, salt: self.order.salt },
        )
        .await?;
        let terms = EscrowTerms {
            maker: self.order.maker_dst.clone(),
            counterparty: resolver.clone(),
            asset: self.order.dst_asset.clone(),
            amount: self.order.dst_amount,
            commitment_root: self.secrets.root(),
            parts_count: self.order.parts_count,
            policy: self.plan.destination,
            safety_deposit: self.order.dst_safety_deposit,
        };
        self.submit(LegKind::Destination, resolver, EscrowCall::Init { instance: self.dst_instance, terms })
            .await?;
        info!(
            "Coordinator: destination leg {} funded with {} {}",
            self.dst_instance, self.order.dst_amount, self.order.dst_asset
        );
        Ok(self.dst_instance)
    }

    /// Resolver releases one destination part to the maker, publishing its secret.
    pub async fn reveal_on_destination(&self, part_index: u32) -> Result<Receipt, CoordinatorError> {
        let (secret, proof) = self.secrets.claim_material(part_index)?;
        let call = EscrowCall::Withdraw { instance: self.dst_instance, part_index, secret, proof };
        let receipt = self.submit(LegKind::Destination, &self.order.resolver_dst, call).await?;
        info!("Coordinator: part {} revealed on destination leg", part_index);
        Ok(receipt)
    }

    /// Resolver collects the matching source part with the secret published on the destination leg.
    pub async fn claim_on_source(&self, part_index: u32) -> Result<Receipt, CoordinatorError> {
        let secret = self
            .revealed_secret(part_index)
            .await
            .ok_or(CoordinatorError::NotRevealed(part_index))?;
        let proof = self.public_tree.proof(part_index)?;
        let call = EscrowCall::WithdrawToResolver {
            instance: self.src_instance,
            part_index,
            secret,
            proof: proof.siblings,
        };
        let receipt = self.submit(LegKind::Source, &self.order.resolver_src, call).await?;
        info!("Coordinator: part {} claimed on source leg", part_index);
        Ok(receipt)
    }

    /// Reveal then claim one part.
    pub async fn settle_part(&self, part_index: u32) -> Result<(Receipt, Receipt), CoordinatorError> {
        let revealed = self.reveal_on_destination(part_index).await?;
        let claimed = self.claim_on_source(part_index).await?;
        Ok((revealed, claimed))
    }

    /// Refunds whatever each funder can take back right now.
    ///
    /// Refunds that are not yet possible or have nothing left are skipped;
    /// any other rejection is returned.
    pub async fn recover(&self) -> Result<Recovery, CoordinatorError> {
        let destination = self
            .try_refund(LegKind::Destination, &self.order.resolver_dst, self.dst_instance)
            .await?;
        let source = self.try_refund(LegKind::Source, &self.order.maker_src, self.src_instance).await?;
        Ok(Recovery { source, destination })
    }

    pub async fn status(&self) -> Result<SwapStatus, CoordinatorError> {
        let (source, destination) = futures::try_join!(
            leg_snapshot(self.source.as_ref(), LegKind::Source, self.src_instance),
            leg_snapshot(self.destination.as_ref(), LegKind::Destination, self.dst_instance),
        )?;
        let outcome = SwapOutcome::from_legs(source.as_ref(), destination.as_ref());
        Ok(SwapStatus { source, destination, outcome })
    }

    async fn revealed_secret(&self, part_index: u32) -> Option<Secret> {
        self.destination
            .events(self.dst_instance)
            .await
            .into_iter()
            .find_map(|event| match event {
                EscrowEvent::PartClaimed { part_index: index, secret, .. } if index == part_index => Some(secret),
                _ => None,
            })
    }

    async fn try_refund(
        &self,
        leg: LegKind,
        funder: &AccountId,
        instance: InstanceAddress,
    ) -> Result<Option<Receipt>, CoordinatorError> {
        match self.ledger(leg).submit(funder.clone(), EscrowCall::Refund { instance }).await {
            Ok(receipt) => {
                info!("Coordinator: {} leg {} refunded to {}", leg, instance, funder);
                Ok(Some(receipt))
            }
            Err(LedgerError::UnknownInstance(_))
            | Err(LedgerError::Escrow(
                EscrowError::NotInitialized
                | EscrowError::TooEarly { .. }
                | EscrowError::NothingToRefund
                | EscrowError::AlreadyRefunded,
            )) => {
                warn!("Coordinator: {} leg {} not refundable now", leg, instance);
                Ok(None)
            }
            Err(source) => Err(CoordinatorError::Ledger { leg, call: "refund", source }),
        }
    }

    async fn submit(&self, leg: LegKind, caller: &AccountId, call: EscrowCall) -> Result<Receipt, CoordinatorError> {
        let name = call.name();
        self.ledger(leg).submit(caller.clone(), call).await.map_err(|source| {
            warn!("Coordinator: {} ledger rejected {} from {}: {}", leg, name, caller, source);
            CoordinatorError::Ledger { leg, call: name, source }
        })
    }

    fn ledger(&self, leg: LegKind) -> &dyn LedgerInterface {
        match leg {
            LegKind::Source => self.source.as_ref(),
            LegKind::Destination => self.destination.as_ref(),
        }
    }
}

// Absent instances are reported as `None` rather than an error
async fn snapshot_of(
    ledger: &dyn LedgerInterface,
    address: InstanceAddress,
) -> Result<Option<EscrowSnapshot>, LedgerError> {
    match ledger.instance(address).await {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(LedgerError::UnknownInstance(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

async fn leg_snapshot(
    ledger: &dyn LedgerInterface,
    leg: LegKind,
    address: InstanceAddress,
) -> Result<Option<EscrowSnapshot>, CoordinatorError> {
    snapshot_of(ledger, address)
        .await
        .map_err(|source| CoordinatorError::Ledger { leg, call: "snapshot", source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{swap_fixture, START};

    #[tokio::test]
    async fn predicted_addresses_match_created_instances() {
        let fixture = swap_fixture(2, 100, 50).await;
        let coordinator = fixture.coordinator().await.unwrap();
        assert_eq!(coordinator.open_source_leg().await.unwrap(), coordinator.source_instance());
        assert_eq!(coordinator.open_destination_leg().await.unwrap(), coordinator.destination_instance());
        let status = coordinator.status().await.unwrap();
        assert_eq!(status.source.unwrap().state, EscrowState::Active);
        assert_eq!(status.destination.unwrap().state, EscrowState::Active);
        assert_eq!(status.outcome, SwapOutcome::Pending);
    }

    #[tokio::test]
    async fn destination_waits_for_source() {
        let fixture = swap_fixture(2, 100, 50).await;
        let coordinator = fixture.coordinator().await.unwrap();
        assert!(matches!(
            coordinator.open_destination_leg().await,
            Err(CoordinatorError::LegNotOpen(LegKind::Source))
        ));
        assert_eq!(coordinator.status().await.unwrap().outcome, SwapOutcome::Pending);
    }

    #[tokio::test]
    async fn source_claim_requires_destination_reveal() {
        let fixture = swap_fixture(2, 100, 50).await;
        let coordinator = fixture.coordinator().await.unwrap();
        coordinator.open_source_leg().await.unwrap();
        coordinator.open_destination_leg().await.unwrap();
        fixture.advance_both(20).await;

        assert!(matches!(coordinator.claim_on_source(0).await, Err(CoordinatorError::NotRevealed(0))));
        coordinator.reveal_on_destination(0).await.unwrap();
        coordinator.claim_on_source(0).await.unwrap();
        assert!(matches!(coordinator.claim_on_source(1).await, Err(CoordinatorError::NotRevealed(1))));
    }

    #[tokio::test]
    async fn mismatched_secret_count_is_rejected() {
        let mut fixture = swap_fixture(2, 100, 50).await;
        fixture.order.parts_count = 3;
        assert!(matches!(fixture.coordinator().await, Err(CoordinatorError::InvalidOrder(_))));
    }

    #[tokio::test]
    async fn plan_is_anchored_at_source_time() {
        let fixture = swap_fixture(1, 10, 10).await;
        let coordinator = fixture.coordinator().await.unwrap();
        let finality = fixture.config.finality_delay.as_secs();
        assert_eq!(coordinator.plan().source.finality_lock(), START + finality);
    }
}
