// Cross-ledger swap coordination

pub mod swap_coordinator;
pub mod types;

pub use swap_coordinator::{Recovery, SwapCoordinator};
pub use types::{CoordinatorError, SwapOrder, SwapOutcome, SwapPlan, SwapStatus};
