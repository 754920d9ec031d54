// In-process ledger hosting one escrow factory and its instances

use crate::data_structures::{AccountId, AssetId, Balance, Salt, Timestamp};
use crate::onchain::escrow_contract::{
    CallContext, EscrowCall, EscrowError, EscrowInstance, EscrowSnapshot, Funds, Settlement,
};
use crate::onchain::events::EscrowEvent;
use crate::onchain::factory::{AddressFormat, EscrowFactory, InstanceAddress, LedgerAddress};
use crate::onchain::interface::{LedgerError, LedgerInterface, Receipt};
use crate::onchain::timelocks::LegKind;
use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;
use tokio::sync::Mutex;

// One successfully executed call
#[derive(Clone, Debug)]
pub struct Block {
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub caller: AccountId,
    pub call: EscrowCall,
    pub events: Vec<EscrowEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Transfer {
    from: AccountId,
    to: AccountId,
    asset: AssetId,
    amount: Balance,
}

#[derive(Debug)]
pub struct ChainSimulator {
    pub chain_id: u64,
    native_asset: AssetId,
    address_format: AddressFormat,
    now: Timestamp,
    blocks: Vec<Block>,
    // Account -> Asset -> Balance; escrow custody is held under the instance's own account
    balances: HashMap<AccountId, HashMap<AssetId, Balance>>,
    factory: EscrowFactory,
    instances: HashMap<InstanceAddress, EscrowInstance>,
}

impl ChainSimulator {
    pub fn new(
        chain_id: u64,
        native_asset: AssetId,
        factory: EscrowFactory,
        address_format: AddressFormat,
    ) -> Self {
        ChainSimulator {
            chain_id,
            native_asset,
            address_format,
            now: 0,
            blocks: Vec::new(),
            balances: HashMap::new(),
            factory,
            instances: HashMap::new(),
        }
    }

    pub fn native_asset(&self) -> &AssetId {
        &self.native_asset
    }

    pub fn address_format(&self) -> AddressFormat {
        self.address_format
    }

    pub fn factory(&self) -> &EscrowFactory {
        &self.factory
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn set_time(&mut self, now: Timestamp) {
        self.now = now;
    }

    pub fn advance_time(&mut self, seconds: u64) -> Timestamp {
        self.now = self.now.saturating_add(seconds);
        self.now
    }

    pub fn block_number(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Credits `amount` out of thin air; test and demo setup only.
    pub fn mint(&mut self, account: &AccountId, asset: &AssetId, amount: Balance) -> Result<(), LedgerError> {
        self.check_chain(account.chain_id, "account")?;
        self.check_chain(asset.chain_id, "asset")?;
        let balance = self
            .balances
            .entry(account.clone())
            .or_default()
            .entry(asset.clone())
            .or_insert(0);
        *balance = balance.checked_add(amount).ok_or_else(|| LedgerError::BalanceOverflow {
            account: account.clone(),
            asset: asset.clone(),
        })?;
        Ok(())
    }

    pub fn get_balance(&self, account: &AccountId, asset: &AssetId) -> Balance {
        self.balances
            .get(account)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of every account's holding of `asset`, custody included.
    pub fn total_supply(&self, asset: &AssetId) -> Balance {
        self.balances
            .values()
            .filter_map(|assets| assets.get(asset))
            .sum()
    }

    pub fn predict(&self, kind: LegKind, salt: &Salt) -> InstanceAddress {
        self.factory.predict(kind, salt)
    }

    pub fn ledger_address(&self, address: &InstanceAddress) -> LedgerAddress {
        address.to_ledger_address(self.address_format)
    }

    /// Account that holds an instance's escrowed funds and safety deposit.
    pub fn custody_account(&self, address: &InstanceAddress) -> AccountId {
        AccountId::new(self.chain_id, self.ledger_address(address).to_string())
    }

    pub fn instance(&self, address: &InstanceAddress) -> Option<&EscrowInstance> {
        self.instances.get(address)
    }

    pub fn snapshot(&self, address: &InstanceAddress) -> Result<EscrowSnapshot, LedgerError> {
        self.instances
            .get(address)
            .map(EscrowInstance::snapshot)
            .ok_or(LedgerError::UnknownInstance(*address))
    }

    pub fn events_for(&self, address: &InstanceAddress) -> Vec<EscrowEvent> {
        self.blocks
            .iter()
            .flat_map(|block| block.events.iter())
            .filter(|event| event.instance() == *address)
            .cloned()
            .collect()
    }

    /// Executes one call atomically and mines it into its own block.
    ///
    /// Escrow checks run first, then every resulting transfer is validated
    /// against a staged copy of the balances. Any failure restores the
    /// instance and leaves balances untouched.
    pub fn execute(&mut self, caller: &AccountId, call: EscrowCall) -> Result<Receipt, LedgerError> {
        self.check_chain(caller.chain_id, "caller")?;
        let ctx = CallContext::new(caller.clone(), self.now);

        let events = match &call {
            EscrowCall::Create { kind, salt } => {
                let (instance, event) = self.factory.create(*kind, *salt)?;
                self.instances.insert(instance.address(), instance);
                vec![event]
            }
            EscrowCall::Init { instance, terms } => {
                self.check_chain(terms.asset.chain_id, "asset")?;
                self.check_chain(terms.maker.chain_id, "maker")?;
                self.check_chain(terms.counterparty.chain_id, "counterparty")?;
                let custody = self.custody_account(instance);
                let native = self.native_asset.clone();
                let escrow = self
                    .instances
                    .get_mut(instance)
                    .ok_or(LedgerError::UnknownInstance(*instance))?;
                let before = escrow.clone();
                escrow.init(&ctx, terms.clone())?;

                let funder = terms.funder().clone();
                let mut transfers = vec![Transfer {
                    from: funder.clone(),
                    to: custody.clone(),
                    asset: terms.asset.clone(),
                    amount: terms.amount,
                }];
                if terms.safety_deposit > 0 {
                    transfers.push(Transfer {
                        from: funder,
                        to: custody,
                        asset: native,
                        amount: terms.safety_deposit,
                    });
                }
                self.commit(*instance, before, &transfers)?;
                Vec::new()
            }
            EscrowCall::ClaimPart { instance, part_index, secret, proof } => {
                self.settle(*instance, |escrow| escrow.claim_part(&ctx, proof, secret, *part_index))?
            }
            EscrowCall::WithdrawToResolver { instance, part_index, secret, proof } => self
                .settle(*instance, |escrow| {
                    escrow.withdraw_to_resolver(&ctx, secret, *part_index, proof)
                })?,
            EscrowCall::Withdraw { instance, part_index, secret, proof } => {
                self.settle(*instance, |escrow| escrow.withdraw(&ctx, secret, *part_index, proof))?
            }
            EscrowCall::Refund { instance } => self.settle(*instance, |escrow| escrow.refund(&ctx))?,
        };

        let block_number = self.block_number() + 1;
        info!(
            "Chain {}: block {} at {} mined {} from {} ({} events)",
            self.chain_id,
            block_number,
            self.now,
            call.name(),
            caller,
            events.len()
        );
        let receipt = Receipt {
            chain_id: self.chain_id,
            block_number,
            timestamp: self.now,
            call: call.name(),
            events: events.clone(),
        };
        self.blocks.push(Block {
            block_number,
            timestamp: self.now,
            caller: caller.clone(),
            call,
            events,
        });
        Ok(receipt)
    }

    // Runs a releasing operation and pays out its settlement
    fn settle<F>(&mut self, address: InstanceAddress, op: F) -> Result<Vec<EscrowEvent>, LedgerError>
    where
        F: FnOnce(&mut EscrowInstance) -> Result<Settlement, EscrowError>,
    {
        let custody = self.custody_account(&address);
        let native = self.native_asset.clone();
        let escrow = self
            .instances
            .get_mut(&address)
            .ok_or(LedgerError::UnknownInstance(address))?;
        let before = escrow.clone();
        let settlement = op(escrow)?;
        // A settlement only exists for initialized instances
        let Some(asset) = escrow.terms().map(|terms| terms.asset.clone()) else {
            self.instances.insert(address, before);
            return Err(EscrowError::NotInitialized.into());
        };

        let transfers: Vec<Transfer> = settlement
            .payouts
            .iter()
            .map(|payout| Transfer {
                from: custody.clone(),
                to: payout.recipient.clone(),
                asset: match payout.funds {
                    Funds::Escrowed => asset.clone(),
                    Funds::SafetyDeposit => native.clone(),
                },
                amount: payout.amount,
            })
            .collect();
        self.commit(address, before, &transfers)?;
        Ok(vec![settlement.event])
    }

    // Applies transfers all-or-nothing; on failure the instance is rolled back
    fn commit(
        &mut self,
        address: InstanceAddress,
        before: EscrowInstance,
        transfers: &[Transfer],
    ) -> Result<(), LedgerError> {
        match stage_transfers(&self.balances, transfers) {
            Ok(staged) => {
                for transfer in transfers {
                    debug!(
                        "Chain {}: {} {} from {} to {}",
                        self.chain_id, transfer.amount, transfer.asset, transfer.from, transfer.to
                    );
                }
                self.balances = staged;
                Ok(())
            }
            Err(err) => {
                debug!("Chain {}: rolling back {} ({})", self.chain_id, address, err);
                self.instances.insert(address, before);
                Err(err)
            }
        }
    }

    fn check_chain(&self, actual: u64, what: &'static str) -> Result<(), LedgerError> {
        if actual != self.chain_id {
            return Err(LedgerError::WrongChain { expected: self.chain_id, actual, what });
        }
        Ok(())
    }
}

fn stage_transfers(
    balances: &HashMap<AccountId, HashMap<AssetId, Balance>>,
    transfers: &[Transfer],
) -> Result<HashMap<AccountId, HashMap<AssetId, Balance>>, LedgerError> {
    let mut staged = balances.clone();
    for transfer in transfers {
        let available = staged
            .get(&transfer.from)
            .and_then(|assets| assets.get(&transfer.asset))
            .copied()
            .unwrap_or(0);
        let remaining = available.checked_sub(transfer.amount).ok_or_else(|| {
            LedgerError::InsufficientFunds {
                account: transfer.from.clone(),
                asset: transfer.asset.clone(),
                needed: transfer.amount,
                available,
            }
        })?;
        staged
            .entry(transfer.from.clone())
            .or_default()
            .insert(transfer.asset.clone(), remaining);

        let credited = staged
            .entry(transfer.to.clone())
            .or_default()
            .entry(transfer.asset.clone())
            .or_insert(0);
        *credited = credited.checked_add(transfer.amount).ok_or_else(|| {
            LedgerError::BalanceOverflow {
                account: transfer.to.clone(),
                asset: transfer.asset.clone(),
            }
        })?;
    }
    Ok(staged)
}

/// A [`ChainSimulator`] behind an async mutex: one writer at a time, any number of callers.
#[derive(Debug)]
pub struct SimulatedLedger {
    chain_id: u64,
    native_asset: AssetId,
    chain: Mutex<ChainSimulator>,
}

impl SimulatedLedger {
    pub fn new(chain: ChainSimulator) -> Self {
        SimulatedLedger {
            chain_id: chain.chain_id,
            native_asset: chain.native_asset.clone(),
            chain: Mutex::new(chain),
        }
    }

    /// Direct access for setup and inspection.
    pub async fn with_chain<R>(&self, f: impl FnOnce(&mut ChainSimulator) -> R) -> R {
        let mut chain = self.chain.lock().await;
        f(&mut chain)
    }

    pub async fn advance_time(&self, seconds: u64) -> Timestamp {
        self.chain.lock().await.advance_time(seconds)
    }

    pub async fn set_time(&self, now: Timestamp) {
        self.chain.lock().await.set_time(now)
    }

    pub async fn mint(&self, account: &AccountId, asset: &AssetId, amount: Balance) -> Result<(), LedgerError> {
        self.chain.lock().await.mint(account, asset, amount)
    }
}

#[async_trait]
impl LedgerInterface for SimulatedLedger {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn native_asset(&self) -> AssetId {
        self.native_asset.clone()
    }

    async fn now(&self) -> Timestamp {
        self.chain.lock().await.now()
    }

    async fn predict_instance(&self, kind: LegKind, salt: Salt) -> InstanceAddress {
        self.chain.lock().await.predict(kind, &salt)
    }

    async fn submit(&self, caller: AccountId, call: EscrowCall) -> Result<Receipt, LedgerError> {
        self.chain.lock().await.execute(&caller, call)
    }

    async fn instance(&self, address: InstanceAddress) -> Result<EscrowSnapshot, LedgerError> {
        self.chain.lock().await.snapshot(&address)
    }

    async fn balance(&self, account: AccountId, asset: AssetId) -> Balance {
        self.chain.lock().await.get_balance(&account, &asset)
    }

    async fn events(&self, instance: InstanceAddress) -> Vec<EscrowEvent> {
        self.chain.lock().await.events_for(&instance)
    }
}
