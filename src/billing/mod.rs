//! Plan allowances, per-call metering and wallet payments.
pub mod payment;
pub mod plan;
pub mod usage;

pub use plan::{Plan, PlanCatalog};
pub use usage::{Apportionment, UsageDenied, UsageSnapshot};
