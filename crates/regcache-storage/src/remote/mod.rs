//! Remote registry tier (L3)

mod tier;

pub use tier::RemoteTier;
