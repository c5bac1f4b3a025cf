//! regcache: Hybrid multi-tier cache with failure-aware fallback
//!
//! Fronts a slow, rate-limited source-code registry with two local tiers:
//! a fast in-memory tier and a persistent sqlite tier, with the remote
//! registry as the source of truth.
//!
//! # Features
//!
//! - **Three tiers** with read-through promotion (memory, sqlite, remote)
//! - **Four write strategies** including an asynchronous write-behind queue
//! - **Circuit breaker** isolating registry failures
//! - **Retry with backoff**, stale/partial fallback and degradation events
//! - **Persistent-tier policy**: TTL expiry, LRU eviction, size enforcement
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use regcache::prelude::*;
//! use std::sync::Arc;
//!
//! # struct MyRegistryClient;
//! # #[async_trait::async_trait]
//! # impl RegistryClient for MyRegistryClient {
//! #     async fn fetch_component(&self, _: &str, _: &str) -> Result<ComponentEntry> { unimplemented!() }
//! #     async fn fetch_block(&self, _: &str, _: &str) -> Result<BlockEntry> { unimplemented!() }
//! #     async fn fetch_rate_limit(&self) -> Result<serde_json::Value> { unimplemented!() }
//! #     async fn list_components(&self, _: &str) -> Result<Vec<String>> { unimplemented!() }
//! #     async fn fetch_directory(&self, _: &str) -> Result<serde_json::Value> { unimplemented!() }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client: Arc<dyn RegistryClient> = Arc::new(MyRegistryClient);
//!     let cache = HybridCache::initialize(CacheConfig::default(), Some(client), None).await?;
//!
//!     match cache.get("component:react:button").await? {
//!         Lookup::Hit(value) => println!("fresh: {value:?}"),
//!         Lookup::Stale(value) => println!("stale but usable: {value:?}"),
//!         _ => println!("miss"),
//!     }
//!
//!     cache.dispose().await?;
//!     Ok(())
//! }
//! ```

mod cache;
mod hybrid;
mod recovery;

// Re-export core
pub use regcache_core::*;

// Re-export storage tiers
pub use regcache_storage::{CircuitBreaker, MaintenanceReport, MemoryTier, RemoteTier, SqliteTier};

pub use cache::{HybridCache, RecoveryStatus};
pub use hybrid::HybridOrchestrator;
pub use recovery::{
    DegradationNotifier, DegradationSummary, ErrorSummary, FallbackChain, FallbackOptions,
    FallbackTier, NotificationEvent, RecordedError, RecoveryManager, Severity,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlockEntry, CacheConfig, CacheError, CacheStats, CacheValue, ComponentEntry, HybridCache,
        Lookup, OpaqueEntry, RegistryClient, RegistryKey, Result, WriteStrategy,
    };
}

#[cfg(test)]
mod testutil;
