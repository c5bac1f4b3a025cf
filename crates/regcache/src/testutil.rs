//! Shared fixtures for orchestrator and cache tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use regcache_core::{
    BlockEntry, BreakerConfig, CacheConfig, CacheError, CacheValue, ComponentEntry,
    RegistryClient, Result, RetryPolicy, SqliteTierConfig, TtlConfig, WriteStrategy,
};

/// Scriptable registry: components can be added, failures toggled, and
/// fetch counts observed.
#[derive(Default)]
pub struct MockRegistry {
    pub fail: AtomicBool,
    pub fetches: AtomicU32,
    components: Mutex<BTreeMap<(String, String), ComponentEntry>>,
    blocks: Mutex<BTreeMap<(String, String), BlockEntry>>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_component(&self, entry: ComponentEntry) {
        self.components
            .lock()
            .insert((entry.framework.clone(), entry.name.clone()), entry);
    }

    pub fn add_block(&self, entry: BlockEntry) {
        self.blocks
            .lock()
            .insert((entry.framework.clone(), entry.name.clone()), entry);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(CacheError::Connection("registry unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn fetch_component(&self, framework: &str, name: &str) -> Result<ComponentEntry> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        self.components
            .lock()
            .get(&(framework.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("component {framework}:{name}")))
    }

    async fn fetch_block(&self, framework: &str, name: &str) -> Result<BlockEntry> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        self.blocks
            .lock()
            .get(&(framework.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("block {framework}:{name}")))
    }

    async fn fetch_rate_limit(&self) -> Result<serde_json::Value> {
        self.check_up()?;
        Ok(serde_json::json!({"remaining": 4999, "limit": 5000}))
    }

    async fn list_components(&self, framework: &str) -> Result<Vec<String>> {
        self.check_up()?;
        Ok(self
            .components
            .lock()
            .keys()
            .filter(|(fw, _)| fw == framework)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn fetch_directory(&self, path: &str) -> Result<serde_json::Value> {
        self.check_up()?;
        Ok(serde_json::json!({"path": path, "entries": []}))
    }
}

pub fn block(framework: &str, name: &str) -> BlockEntry {
    let mut files = BTreeMap::new();
    files.insert("page.tsx".to_string(), "export default null".to_string());
    files.insert("chart.tsx".to_string(), "export const Chart = 1".to_string());
    BlockEntry {
        framework: framework.to_string(),
        name: name.to_string(),
        category: Some("dashboard".to_string()),
        kind: regcache_core::BlockKind::Complex,
        description: None,
        files,
        structure: None,
        dependencies: vec!["recharts".to_string()],
        components_used: vec!["card".to_string()],
        total_size: None,
        remote_sha: None,
    }
}

pub fn component(framework: &str, name: &str, source: &str) -> ComponentEntry {
    ComponentEntry {
        framework: framework.to_string(),
        name: name.to_string(),
        source_code: source.to_string(),
        demo_code: None,
        metadata: None,
        dependencies: vec![],
        registry_dependencies: vec![],
        remote_sha: None,
        file_size: None,
        last_modified: None,
    }
}

pub fn component_value(framework: &str, name: &str, source: &str) -> CacheValue {
    CacheValue::Component(component(framework, name, source))
}

/// Configuration tuned for tests: temp database, quick retries, short
/// breaker timeout.
pub fn test_config(dir: &TempDir, strategy: WriteStrategy) -> CacheConfig {
    let mut config = CacheConfig {
        strategy,
        ..Default::default()
    };
    config.storage.sqlite = SqliteTierConfig {
        path: dir
            .path()
            .join("cache.db")
            .to_string_lossy()
            .into_owned(),
        ..Default::default()
    };
    // Background maintenance stays out of the way unless a test asks
    config.storage.sqlite.vacuum_interval_seconds = 0;
    config.ttl = TtlConfig::default();
    config.breaker = BreakerConfig {
        enabled: true,
        failure_threshold: 3,
        open_timeout_ms: 1_000,
        success_threshold: 2,
    };
    config.recovery.retry = RetryPolicy {
        max_retries: 0,
        backoff_ms: 1,
        backoff_multiplier: 2.0,
        max_backoff_ms: 5,
    };
    config
}
