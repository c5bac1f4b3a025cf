//! Persistent embedded-SQL tier (L2)

mod maintenance;
mod schema;
mod tier;

pub use maintenance::MaintenanceReport;
pub use schema::{connect, migrate};
pub use tier::SqliteTier;
