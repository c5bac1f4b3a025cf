//! Core traits

mod registry;
mod tier;

pub use registry::RegistryClient;
pub use tier::CacheTier;
