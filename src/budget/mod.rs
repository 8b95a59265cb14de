//! Budget tracking module
//!
//! Points-based API quotas (Shopify query cost, ShipHero complexity) refill
//! either continuously at a restore rate or all at once at a window boundary.
//! The `BudgetTracker` mirrors the provider's bucket from response metadata
//! and decides how long to wait before the next request.

mod tracker;
mod types;

pub use tracker::BudgetTracker;
pub use types::{BudgetConfig, Recharge, Usage, Wait};
