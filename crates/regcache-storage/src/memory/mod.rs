//! In-memory tier (L1)

mod tier;

pub use tier::MemoryTier;
