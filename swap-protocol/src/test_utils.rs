// swap-protocol/src/test_utils.rs
// Shared fixtures for unit tests, integration tests and the experiments binary

use crate::commitment::secrets::SecretSet;
use crate::config::SwapConfig;
use crate::cross_chain::{CoordinatorError, SwapCoordinator, SwapOrder};
use crate::data_structures::{AccountId, AssetId, Balance, Secret, Timestamp};
use crate::onchain::chain_simulator::{ChainSimulator, SimulatedLedger};
use crate::onchain::factory::{AddressFormat, EscrowFactory, FactoryIdentity, ImplementationCode};
use crate::onchain::interface::LedgerInterface;
use ethers::types::{Address, H256};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

pub const SRC_CHAIN: u64 = 1;
pub const DST_CHAIN: u64 = 2;

// Both simulated clocks start here
pub const START: Timestamp = 1_700_000_000;

// Native balance handed to each funder for safety deposits
pub const NATIVE_FLOAT: Balance = 1_000_000;

pub fn test_account(chain_id: u64, name: &str) -> AccountId {
    AccountId::new(chain_id, name)
}

pub fn test_code() -> ImplementationCode {
    ImplementationCode::from_bytecode(b"escrow-src-v1", b"escrow-dst-v1")
}

/// EVM-style ledger: 20-byte factory identity and truncated instance addresses.
pub fn evm_chain(chain_id: u64, native_symbol: &str) -> ChainSimulator {
    let factory = EscrowFactory::new(FactoryIdentity::Evm(Address::repeat_byte(chain_id as u8)), test_code());
    let mut chain = ChainSimulator::new(chain_id, AssetId::native(chain_id, native_symbol), factory, AddressFormat::Evm);
    chain.set_time(START);
    chain
}

/// Substrate-style ledger: 32-byte identities end to end.
pub fn substrate_chain(chain_id: u64, native_symbol: &str) -> ChainSimulator {
    let factory = EscrowFactory::new(FactoryIdentity::Raw(H256::repeat_byte(chain_id as u8)), test_code());
    let mut chain =
        ChainSimulator::new(chain_id, AssetId::native(chain_id, native_symbol), factory, AddressFormat::Substrate);
    chain.set_time(START);
    chain
}

/// Deterministic secrets so runs are reproducible.
pub fn seeded_secrets(parts_count: u32, seed: u64) -> SecretSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let secrets = (0..parts_count).map(|_| Secret::random(&mut rng)).collect();
    match SecretSet::from_secrets(secrets) {
        Ok(set) => set,
        Err(err) => panic!("cannot build secret set of {} parts: {}", parts_count, err),
    }
}

pub fn src_token() -> AssetId {
    AssetId::token(SRC_CHAIN, "USDC", "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")
}

pub fn dst_token() -> AssetId {
    AssetId::token(DST_CHAIN, "USDT", "1984")
}

/// Two funded ledgers plus an order between them, not yet opened.
pub struct SwapFixture {
    pub source: Arc<SimulatedLedger>,
    pub destination: Arc<SimulatedLedger>,
    pub order: SwapOrder,
    pub secrets: SecretSet,
    pub config: SwapConfig,
}

impl SwapFixture {
    pub async fn coordinator(&self) -> Result<SwapCoordinator, CoordinatorError> {
        let source: Arc<dyn LedgerInterface> = self.source.clone();
        let destination: Arc<dyn LedgerInterface> = self.destination.clone();
        SwapCoordinator::with_config(source, destination, self.order.clone(), &self.config, self.secrets.clone())
            .await
    }

    pub async fn advance_both(&self, seconds: u64) {
        self.source.advance_time(seconds).await;
        self.destination.advance_time(seconds).await;
    }

    pub async fn set_both(&self, now: Timestamp) {
        self.source.set_time(now).await;
        self.destination.set_time(now).await;
    }
}

/// EVM source ledger (chain 1) and Substrate-style destination ledger (chain 2),
/// with the maker funded on the source and the resolver on the destination.
pub async fn swap_fixture(parts_count: u32, src_amount: Balance, dst_amount: Balance) -> SwapFixture {
    let config = SwapConfig { default_parts_count: parts_count, ..SwapConfig::default() };
    swap_fixture_with(config, src_amount, dst_amount).await
}

/// Same as [`swap_fixture`], sized and timed by `config`.
pub async fn swap_fixture_with(config: SwapConfig, src_amount: Balance, dst_amount: Balance) -> SwapFixture {
    let parts_count = config.default_parts_count;
    let source = Arc::new(SimulatedLedger::new(evm_chain(SRC_CHAIN, "ETH")));
    let destination = Arc::new(SimulatedLedger::new(substrate_chain(DST_CHAIN, "DOT")));

    let order = SwapOrder {
        salt: H256::from_low_u64_be(parts_count as u64 * 1_000 + src_amount as u64 % 1_000),
        maker_src: test_account(SRC_CHAIN, "maker"),
        maker_dst: test_account(DST_CHAIN, "maker"),
        resolver_src: test_account(SRC_CHAIN, "resolver"),
        resolver_dst: test_account(DST_CHAIN, "resolver"),
        src_asset: src_token(),
        src_amount,
        dst_asset: dst_token(),
        dst_amount,
        parts_count,
        src_safety_deposit: config.src_safety_deposit,
        dst_safety_deposit: config.dst_safety_deposit,
    };

    let funding = [
        (&source, &order.maker_src, order.src_asset.clone(), src_amount),
        (&source, &order.maker_src, source.native_asset(), NATIVE_FLOAT),
        (&destination, &order.resolver_dst, order.dst_asset.clone(), dst_amount),
        (&destination, &order.resolver_dst, destination.native_asset(), NATIVE_FLOAT),
    ];
    for (ledger, account, asset, amount) in funding {
        if let Err(err) = ledger.mint(account, &asset, amount).await {
            panic!("fixture funding failed: {}", err);
        }
    }

    SwapFixture {
        source,
        destination,
        order,
        secrets: seeded_secrets(parts_count, 7),
        config,
    }
}
