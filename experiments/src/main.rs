// Partial-fill swap between an EVM-style and a Substrate-style simulated ledger.
//
// Usage: experiments [config.json] [parts-to-settle]

mod logging;

use anyhow::{bail, Context, Result};
use swap_protocol::{
    config::SwapConfig,
    cross_chain::SwapOutcome,
    onchain::LedgerInterface,
    test_utils::{dst_token, src_token, swap_fixture_with},
};
use tracing::info;

const SRC_AMOUNT: u128 = 1_000_000;
const DST_AMOUNT: u128 = 400_000;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info")?;

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => SwapConfig::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => SwapConfig::default(),
    };
    let parts = config.default_parts_count;
    let settle = match args.next() {
        Some(raw) => raw.parse::<u32>().with_context(|| format!("parts to settle: {}", raw))?,
        None => parts.div_ceil(2),
    };
    if settle > parts {
        bail!("cannot settle {} of {} parts", settle, parts);
    }

    let fixture = swap_fixture_with(config.clone(), SRC_AMOUNT, DST_AMOUNT).await;
    let coordinator = fixture.coordinator().await?;
    let plan = *coordinator.plan();
    info!(source = %plan.source, destination = %plan.destination, "swap planned");

    coordinator.open_source_leg().await?;
    coordinator.open_destination_leg().await?;

    fixture.set_both(plan.source.finality_lock()).await;
    for part in 0..settle {
        coordinator.settle_part(part).await?;
    }
    info!(settled = settle, of = parts, "parts settled");

    // Leave the rest unfilled and let both legs expire
    fixture.set_both(plan.destination.cancel_lock()).await;
    coordinator.recover().await?;
    fixture.set_both(plan.source.cancel_lock()).await;
    coordinator.recover().await?;

    let status = coordinator.status().await?;
    match &status.outcome {
        SwapOutcome::Completed => info!("swap completed"),
        SwapOutcome::PartiallyFilled { source_parts, .. } => {
            info!(parts = ?source_parts, "swap partially filled")
        }
        SwapOutcome::Refunded => info!("swap fully refunded"),
        SwapOutcome::Pending => bail!("swap still pending after both cancel locks"),
    }

    let order = &fixture.order;
    let balances = [
        ("maker (source)", fixture.source.balance(order.maker_src.clone(), src_token()).await),
        ("resolver (source)", fixture.source.balance(order.resolver_src.clone(), src_token()).await),
        ("maker (destination)", fixture.destination.balance(order.maker_dst.clone(), dst_token()).await),
        ("resolver (destination)", fixture.destination.balance(order.resolver_dst.clone(), dst_token()).await),
    ];
    for (who, balance) in balances {
        println!("{:<24} {:>12}", who, balance);
    }
    Ok(())
}
