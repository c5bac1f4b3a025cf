//! regcache-core: Core traits and types for the regcache library
//!
//! This crate provides the foundational types and traits used throughout
//! the regcache ecosystem: the structured key codec, the cached value
//! union, tier traits, errors, statistics and the typed configuration.

mod config;
mod error;
mod key;
mod pattern;
mod traits;
mod types;

pub use config::{
    parse_size, BreakerConfig, CacheConfig, ConfigDelta, FallbackConfig, MemoryTierConfig,
    NotificationConfig, PerformanceConfig, RecoveryConfig, RegistryTierConfig, RetryPolicy,
    SqliteTierConfig, StorageConfig, StorageKind, TtlConfig, WriteStrategy,
};
pub use error::{CacheError, Result};
pub use key::{validate_key, KeyKind, RegistryKey, MAX_KEY_LEN};
pub use pattern::glob_match;
pub use traits::*;
pub use types::*;
