//! Ordered tier traversal with stale/partial acceptance

use std::sync::Arc;
use std::time::Duration;

use regcache_core::{CacheTier, FallbackConfig, Lookup, Result};

use super::notify::{DegradationNotifier, Severity};

/// One registered tier in the chain
pub struct FallbackTier {
    pub name: String,
    pub provider: Arc<dyn CacheTier>,
    /// Lower priorities are consulted first
    pub priority: u32,
    /// Whether this tier may serve values past their freshness policy
    pub allow_stale: bool,
    /// Whether this tier may serve values failing required-field checks
    pub allow_partial: bool,
}

/// Per-call options for a chain traversal
#[derive(Debug, Clone)]
pub struct FallbackOptions {
    pub timeout: Duration,
    pub allow_stale: bool,
    pub max_stale_age_seconds: u64,
    pub partial_acceptable: bool,
    /// Field names a value must populate to count as complete
    pub required_fields: Vec<String>,
}

impl From<&FallbackConfig> for FallbackOptions {
    fn from(config: &FallbackConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            allow_stale: config.allow_stale,
            max_stale_age_seconds: config.max_stale_age_seconds,
            partial_acceptable: config.partial_acceptable,
            required_fields: Vec::new(),
        }
    }
}

/// Tiers ordered by ascending priority, traversed until one yields an
/// acceptable value.
pub struct FallbackChain {
    tiers: Vec<FallbackTier>,
    notifier: DegradationNotifier,
}

impl FallbackChain {
    pub fn new(notifier: DegradationNotifier) -> Self {
        Self { tiers: Vec::new(), notifier }
    }

    /// Register a tier, keeping the chain ordered
    pub fn register(&mut self, tier: FallbackTier) {
        let idx = self
            .tiers
            .partition_point(|existing| existing.priority <= tier.priority);
        self.tiers.insert(idx, tier);
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Walk the chain for `key`.
    ///
    /// Per tier: a fresh value passing required-field validation wins; a
    /// failing validation may still be accepted as partial; an absent
    /// value may be re-read stale when both the tier and the caller allow
    /// it. Errors and timeouts are recorded and the walk continues. Full
    /// exhaustion emits a degradation event and reports a miss.
    pub async fn get_with_fallback(&self, key: &str, options: &FallbackOptions) -> Lookup {
        for tier in &self.tiers {
            match tokio::time::timeout(options.timeout, tier.provider.get(key)).await {
                Ok(Ok(Some(value))) => {
                    let missing: Vec<&String> = options
                        .required_fields
                        .iter()
                        .filter(|f| !value.field_is_populated(f))
                        .collect();
                    if missing.is_empty() {
                        return Lookup::Hit(value);
                    }
                    if tier.allow_partial && options.partial_acceptable {
                        self.notifier.notify(
                            Severity::Warning,
                            tier.name.clone(),
                            Some(key.to_string()),
                            format!("serving partial value; missing {missing:?}"),
                        );
                        return Lookup::Partial(value);
                    }
                    tracing::debug!(
                        tier = %tier.name,
                        key,
                        ?missing,
                        "value incomplete; continuing down the chain"
                    );
                }
                Ok(Ok(None)) => {
                    if tier.allow_stale && options.allow_stale {
                        if let Some(stale) = self.try_stale(tier, key, options).await {
                            return stale;
                        }
                    }
                }
                Ok(Err(e)) => {
                    self.notifier.notify(
                        Severity::Warning,
                        tier.name.clone(),
                        Some(key.to_string()),
                        format!("tier error: {e}"),
                    );
                }
                Err(_) => {
                    self.notifier.notify(
                        Severity::Warning,
                        tier.name.clone(),
                        Some(key.to_string()),
                        format!("tier timed out after {:?}", options.timeout),
                    );
                }
            }
        }

        self.notifier.notify(
            Severity::Error,
            "chain",
            Some(key.to_string()),
            "all fallback tiers failed",
        );
        Lookup::Miss
    }

    async fn try_stale(
        &self,
        tier: &FallbackTier,
        key: &str,
        options: &FallbackOptions,
    ) -> Option<Lookup> {
        let stale: Result<_> =
            match tokio::time::timeout(options.timeout, tier.provider.get_stale(key)).await {
                Ok(result) => result,
                Err(_) => return None,
            };
        match stale {
            Ok(Some((value, age))) if age <= options.max_stale_age_seconds => {
                self.notifier.notify(
                    Severity::Warning,
                    tier.name.clone(),
                    Some(key.to_string()),
                    format!("serving stale value, age {age}s"),
                );
                Some(Lookup::Stale(value))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use regcache_core::{
        CacheError, CacheValue, ComponentEntry, EntryMetadata, NotificationConfig, OpaqueEntry,
        TierName,
    };

    /// Scripted tier for chain tests
    struct ScriptedTier {
        fresh: Option<CacheValue>,
        stale: Option<(CacheValue, u64)>,
        error: Option<CacheError>,
        delay: Option<Duration>,
    }

    impl ScriptedTier {
        fn empty() -> Self {
            Self { fresh: None, stale: None, error: None, delay: None }
        }

        fn with_fresh(value: CacheValue) -> Self {
            Self { fresh: Some(value), ..Self::empty() }
        }

        fn with_stale(value: CacheValue, age: u64) -> Self {
            Self { stale: Some((value, age)), ..Self::empty() }
        }

        fn failing(error: CacheError) -> Self {
            Self { error: Some(error), ..Self::empty() }
        }
    }

    #[async_trait]
    impl CacheTier for ScriptedTier {
        fn tier(&self) -> TierName {
            TierName::Memory
        }
        async fn get(&self, _key: &str) -> Result<Option<CacheValue>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(e) = &self.error {
                return Err(e.clone());
            }
            Ok(self.fresh.clone())
        }
        async fn get_stale(&self, _key: &str) -> Result<Option<(CacheValue, u64)>> {
            Ok(self.stale.clone())
        }
        async fn set(&self, _k: &str, _v: &CacheValue, _t: Option<u64>) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _k: &str) -> Result<bool> {
            Ok(false)
        }
        async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<CacheValue>>> {
            Ok(vec![None; keys.len()])
        }
        async fn set_many(&self, _e: &[(String, CacheValue, Option<u64>)]) -> Result<()> {
            Ok(())
        }
        async fn keys(&self, _p: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn len(&self) -> Result<usize> {
            Ok(0)
        }
        async fn get_metadata(&self, _k: &str) -> Result<Option<EntryMetadata>> {
            Ok(None)
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    fn component(source: &str) -> CacheValue {
        CacheValue::Component(ComponentEntry {
            framework: "react".to_string(),
            name: "button".to_string(),
            source_code: source.to_string(),
            demo_code: None,
            metadata: None,
            dependencies: vec![],
            registry_dependencies: vec![],
            remote_sha: None,
            file_size: None,
            last_modified: None,
        })
    }

    fn options() -> FallbackOptions {
        FallbackOptions {
            timeout: Duration::from_millis(200),
            allow_stale: true,
            max_stale_age_seconds: 3_600,
            partial_acceptable: false,
            required_fields: vec![],
        }
    }

    fn chain_with(tiers: Vec<FallbackTier>) -> (FallbackChain, DegradationNotifier) {
        let notifier = DegradationNotifier::new(NotificationConfig::default());
        let mut chain = FallbackChain::new(notifier.clone());
        for tier in tiers {
            chain.register(tier);
        }
        (chain, notifier)
    }

    fn tier(name: &str, priority: u32, provider: ScriptedTier) -> FallbackTier {
        FallbackTier {
            name: name.to_string(),
            provider: Arc::new(provider),
            priority,
            allow_stale: true,
            allow_partial: false,
        }
    }

    #[tokio::test]
    async fn test_first_fresh_value_wins() {
        let (chain, _) = chain_with(vec![
            tier("memory", 10, ScriptedTier::empty()),
            tier("persistent", 20, ScriptedTier::with_fresh(component("from-l2"))),
            tier("remote", 30, ScriptedTier::with_fresh(component("from-l3"))),
        ]);
        let result = chain.get_with_fallback("component:react:button", &options()).await;
        match result {
            Lookup::Hit(CacheValue::Component(c)) => assert_eq!(c.source_code, "from-l2"),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_priority_order_not_registration_order() {
        let (chain, _) = chain_with(vec![
            tier("persistent", 20, ScriptedTier::with_fresh(component("from-l2"))),
            tier("memory", 10, ScriptedTier::with_fresh(component("from-l1"))),
        ]);
        let result = chain.get_with_fallback("component:react:button", &options()).await;
        assert_eq!(
            result.value().unwrap(),
            component("from-l1")
        );
    }

    #[tokio::test]
    async fn test_errors_continue_down_the_chain() {
        let (chain, notifier) = chain_with(vec![
            tier("memory", 10, ScriptedTier::failing(CacheError::Backend("boom".to_string()))),
            tier("persistent", 20, ScriptedTier::with_fresh(component("survivor"))),
        ]);
        let result = chain.get_with_fallback("component:react:button", &options()).await;
        assert!(result.is_hit());
        assert_eq!(notifier.recent(10).len(), 1);
    }

    #[tokio::test]
    async fn test_stale_acceptance_bounded_by_age() {
        let (chain, _) = chain_with(vec![tier(
            "persistent",
            20,
            ScriptedTier::with_stale(component("old"), 1_000),
        )]);
        let result = chain.get_with_fallback("component:react:button", &options()).await;
        assert!(matches!(result, Lookup::Stale(_)));

        // Too old
        let (chain, _) = chain_with(vec![tier(
            "persistent",
            20,
            ScriptedTier::with_stale(component("ancient"), 10_000),
        )]);
        let result = chain.get_with_fallback("component:react:button", &options()).await;
        assert_eq!(result, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_stale_needs_both_flags() {
        let mut no_stale_tier = tier(
            "persistent",
            20,
            ScriptedTier::with_stale(component("old"), 10),
        );
        no_stale_tier.allow_stale = false;
        let (chain, _) = chain_with(vec![no_stale_tier]);
        let result = chain.get_with_fallback("component:react:button", &options()).await;
        assert_eq!(result, Lookup::Miss);

        let (chain, _) = chain_with(vec![tier(
            "persistent",
            20,
            ScriptedTier::with_stale(component("old"), 10),
        )]);
        let mut opts = options();
        opts.allow_stale = false;
        let result = chain.get_with_fallback("component:react:button", &opts).await;
        assert_eq!(result, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_required_fields_gate_partial() {
        let incomplete = CacheValue::Component(ComponentEntry {
            source_code: String::new(),
            ..match component("x") {
                CacheValue::Component(c) => c,
                _ => unreachable!(),
            }
        });

        let mut opts = options();
        opts.required_fields = vec!["source_code".to_string()];

        // Not partial-acceptable: incomplete value is skipped
        let (chain, _) = chain_with(vec![tier(
            "persistent",
            20,
            ScriptedTier::with_fresh(incomplete.clone()),
        )]);
        let result = chain.get_with_fallback("component:react:button", &opts).await;
        assert_eq!(result, Lookup::Miss);

        // Partial-acceptable on both sides: tagged partial
        let mut partial_tier = tier("persistent", 20, ScriptedTier::with_fresh(incomplete));
        partial_tier.allow_partial = true;
        let (chain, _) = chain_with(vec![partial_tier]);
        opts.partial_acceptable = true;
        let result = chain.get_with_fallback("component:react:button", &opts).await;
        assert!(matches!(result, Lookup::Partial(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_and_skipped() {
        let slow = ScriptedTier {
            delay: Some(Duration::from_millis(500)),
            fresh: Some(component("slow")),
            stale: None,
            error: None,
        };
        let (chain, notifier) = chain_with(vec![
            tier("remote", 30, slow),
            tier("persistent", 40, ScriptedTier::with_fresh(component("fast"))),
        ]);
        let result = chain.get_with_fallback("component:react:button", &options()).await;
        assert_eq!(result.value().unwrap(), component("fast"));
        assert!(notifier.recent(10)[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_exhaustion_notifies_and_misses() {
        let (chain, notifier) = chain_with(vec![
            tier("memory", 10, ScriptedTier::empty()),
            tier("persistent", 20, ScriptedTier::empty()),
        ]);
        let result = chain
            .get_with_fallback(
                "component:react:button",
                &FallbackOptions { allow_stale: false, ..options() },
            )
            .await;
        assert_eq!(result, Lookup::Miss);
        let events = notifier.recent(10);
        assert_eq!(events.last().unwrap().severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_opaque_values_flow_through() {
        let value = CacheValue::Opaque(OpaqueEntry {
            content_type: "application/json".to_string(),
            payload: b"{}".to_vec(),
        });
        let (chain, _) = chain_with(vec![tier(
            "memory",
            10,
            ScriptedTier::with_fresh(value.clone()),
        )]);
        let result = chain.get_with_fallback("metadata:rate-limit", &options()).await;
        assert_eq!(result, Lookup::Hit(value));
    }
}
