//! Remote registry client interface
//!
//! The HTTP client itself (rate-limit tracking, path construction, payload
//! decoding) lives in the embedding application; the cache consumes it
//! through this trait.

use async_trait::async_trait;
use crate::{BlockEntry, ComponentEntry, Result};

/// Client for the remote source-code registry
#[async_trait]
pub trait RegistryClient: Send + Sync + 'static {
    /// Fetch a component's source, demo and registry metadata
    async fn fetch_component(&self, framework: &str, name: &str) -> Result<ComponentEntry>;

    /// Fetch a block bundle: files, structure, dependencies
    async fn fetch_block(&self, framework: &str, name: &str) -> Result<BlockEntry>;

    /// Fetch rate-limit metadata for the registry account
    async fn fetch_rate_limit(&self) -> Result<serde_json::Value>;

    /// List component names available for a framework
    async fn list_components(&self, framework: &str) -> Result<Vec<String>>;

    /// Fetch a directory tree listing under `path`
    async fn fetch_directory(&self, path: &str) -> Result<serde_json::Value>;
}
