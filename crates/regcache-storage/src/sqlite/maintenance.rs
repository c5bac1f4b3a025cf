//! TTL cleanup, size enforcement and LRU eviction for the persistent tier

use sqlx::Row;

use regcache_core::Result;

use super::tier::{db_err, SqliteTier};

/// Outcome of one maintenance pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_cleaned: u64,
    pub items_evicted: u64,
    pub final_size: u64,
    pub final_count: u64,
}

/// One evictable row across the union of tables, LRU-ordered
#[derive(Debug)]
struct Victim {
    table: &'static str,
    key1: String,
    key2: String,
    size: u64,
}

impl SqliteTier {
    /// Total stored bytes across components, blocks and the kv table.
    ///
    /// Rows with missing sizes contribute 0.
    pub async fn total_size_bytes(&self) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COALESCE((SELECT SUM(COALESCE(file_size, 0)) FROM components), 0) \
                  + COALESCE((SELECT SUM(COALESCE(total_size, 0)) FROM blocks), 0) \
                  + COALESCE((SELECT SUM(byte_size) FROM kv), 0) AS total",
        )
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;
        let total: i64 = row.try_get("total").map_err(db_err)?;
        Ok(total.max(0) as u64)
    }

    /// Number of rows currently past their TTL
    pub async fn expired_count(&self) -> Result<u64> {
        let components_ttl = self.ttl_config().components as i64;
        let blocks_ttl = self.ttl_config().blocks as i64;
        let metadata_ttl = self.ttl_config().metadata as i64;
        let row = sqlx::query(
            "SELECT \
               (SELECT COUNT(*) FROM components \
                 WHERE ?1 > 0 AND (unixepoch() - cached_at) > ?1) \
             + (SELECT COUNT(*) FROM blocks \
                 WHERE ?2 > 0 AND (unixepoch() - cached_at) > ?2) \
             + (SELECT COUNT(*) FROM kv \
                 WHERE COALESCE(ttl_seconds, ?3) > 0 \
                   AND (unixepoch() - cached_at) > COALESCE(ttl_seconds, ?3)) AS expired",
        )
        .bind(components_ttl)
        .bind(blocks_ttl)
        .bind(metadata_ttl)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;
        let expired: i64 = row.try_get("expired").map_err(db_err)?;
        Ok(expired.max(0) as u64)
    }

    /// Delete every expired row in one transaction; returns the count
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let components_ttl = self.ttl_config().components as i64;
        let blocks_ttl = self.ttl_config().blocks as i64;
        let metadata_ttl = self.ttl_config().metadata as i64;

        let mut tx = self.pool().begin().await.map_err(db_err)?;
        let mut cleaned = 0u64;

        cleaned += sqlx::query(
            "DELETE FROM components WHERE ?1 > 0 AND (unixepoch() - cached_at) > ?1",
        )
        .bind(components_ttl)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        cleaned += sqlx::query("DELETE FROM blocks WHERE ?1 > 0 AND (unixepoch() - cached_at) > ?1")
            .bind(blocks_ttl)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        cleaned += sqlx::query(
            "DELETE FROM kv WHERE COALESCE(ttl_seconds, ?1) > 0 \
               AND (unixepoch() - cached_at) > COALESCE(ttl_seconds, ?1)",
        )
        .bind(metadata_ttl)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        tx.commit().await.map_err(db_err)?;

        if cleaned > 0 {
            tracing::debug!(cleaned, "expired rows removed");
        }
        Ok(cleaned)
    }

    async fn victims_lru(&self) -> Result<Vec<Victim>> {
        let rows = sqlx::query(
            "SELECT 'components' AS tbl, framework AS k1, name AS k2, \
                    COALESCE(file_size, 0) AS size, accessed_at FROM components \
             UNION ALL \
             SELECT 'blocks', framework, name, COALESCE(total_size, 0), accessed_at FROM blocks \
             UNION ALL \
             SELECT 'kv', key, '', byte_size, accessed_at FROM kv \
             ORDER BY accessed_at ASC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let tbl: String = row.try_get("tbl").map_err(db_err)?;
                let table = match tbl.as_str() {
                    "components" => "components",
                    "blocks" => "blocks",
                    _ => "kv",
                };
                let size: i64 = row.try_get("size").map_err(db_err)?;
                Ok(Victim {
                    table,
                    key1: row.try_get("k1").map_err(db_err)?,
                    key2: row.try_get("k2").map_err(db_err)?,
                    size: size.max(0) as u64,
                })
            })
            .collect()
    }

    async fn delete_victims(&self, victims: &[&Victim]) -> Result<()> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;
        for victim in victims {
            match victim.table {
                "kv" => {
                    sqlx::query("DELETE FROM kv WHERE key = ?")
                        .bind(&victim.key1)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                }
                table => {
                    let sql = format!("DELETE FROM {table} WHERE framework = ? AND name = ?");
                    sqlx::query(&sql)
                        .bind(&victim.key1)
                        .bind(&victim.key2)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Evict least-recently-accessed rows until at least `bytes` are freed.
    ///
    /// Returns the number of rows evicted. All deletions run in one
    /// transaction.
    pub async fn evict_by_size(&self, bytes: u64) -> Result<u64> {
        if bytes == 0 {
            return Ok(0);
        }
        let victims = self.victims_lru().await?;
        let mut chosen = Vec::new();
        let mut freed = 0u64;
        for victim in &victims {
            if freed >= bytes {
                break;
            }
            freed += victim.size;
            chosen.push(victim);
        }
        if chosen.is_empty() {
            return Ok(0);
        }
        self.delete_victims(&chosen).await?;
        tracing::info!(evicted = chosen.len(), freed, "size-based eviction");
        Ok(chosen.len() as u64)
    }

    /// Evict the `n` least-recently-accessed rows across all tables
    pub async fn evict_lru(&self, n: u64) -> Result<u64> {
        if n == 0 {
            return Ok(0);
        }
        let victims = self.victims_lru().await?;
        let chosen: Vec<&Victim> = victims.iter().take(n as usize).collect();
        if chosen.is_empty() {
            return Ok(0);
        }
        self.delete_victims(&chosen).await?;
        Ok(chosen.len() as u64)
    }

    /// Evict until the total stored size fits the configured cap.
    ///
    /// Returns the number of rows evicted.
    pub async fn enforce_max_size(&self) -> Result<u64> {
        let total = self.total_size_bytes().await?;
        let max = self.config().max_bytes;
        if total <= max {
            return Ok(0);
        }
        self.evict_by_size(total - max).await
    }

    /// Whether a maintenance pass is due: near the size cap, or a large
    /// share of rows already expired.
    pub async fn needs_maintenance(&self) -> Result<bool> {
        let total = self.total_size_bytes().await?;
        if total as f64 > self.config().max_bytes as f64 * 0.9 {
            return Ok(true);
        }
        let count = self.row_count().await?;
        if count == 0 {
            return Ok(false);
        }
        let expired = self.expired_count().await?;
        Ok(expired as f64 > count as f64 * 0.1)
    }

    /// Total row count across all tables
    pub async fn row_count(&self) -> Result<u64> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM components) + (SELECT COUNT(*) FROM blocks) \
             + (SELECT COUNT(*) FROM kv) AS total",
        )
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;
        let total: i64 = row.try_get("total").map_err(db_err)?;
        Ok(total.max(0) as u64)
    }

    /// Run expiry cleanup then size enforcement
    pub async fn perform_maintenance(&self) -> Result<MaintenanceReport> {
        let expired_cleaned = self.cleanup_expired().await?;
        let items_evicted = self.enforce_max_size().await?;
        let report = MaintenanceReport {
            expired_cleaned,
            items_evicted,
            final_size: self.total_size_bytes().await?,
            final_count: self.row_count().await?,
        };
        tracing::debug!(?report, "maintenance pass complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regcache_core::{ComponentEntry, SqliteTierConfig, TtlConfig};
    use tempfile::TempDir;

    async fn tier_with_max(max_bytes: u64, ttl: TtlConfig) -> (SqliteTier, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = SqliteTierConfig {
            path: dir.path().join("maint.db").to_string_lossy().into_owned(),
            max_bytes,
            ..Default::default()
        };
        let tier = SqliteTier::open(config, ttl).await.unwrap();
        (tier, dir)
    }

    fn sized_component(name: &str, size: u64) -> ComponentEntry {
        ComponentEntry {
            framework: "react".to_string(),
            name: name.to_string(),
            source_code: "x".to_string(),
            demo_code: None,
            metadata: None,
            dependencies: vec![],
            registry_dependencies: vec![],
            remote_sha: None,
            file_size: Some(size),
            last_modified: None,
        }
    }

    async fn backdate_access(tier: &SqliteTier, name: &str, seconds: i64) {
        sqlx::query("UPDATE components SET accessed_at = accessed_at - ? WHERE name = ?")
            .bind(seconds)
            .bind(name)
            .execute(tier.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_total_size_sums_tables() {
        let (tier, _dir) = tier_with_max(10_000, TtlConfig::default()).await;
        tier.set_component(&sized_component("a", 200)).await.unwrap();
        tier.set_component(&sized_component("b", 150)).await.unwrap();
        assert_eq!(tier.total_size_bytes().await.unwrap(), 350);
    }

    #[tokio::test]
    async fn test_cleanup_expired_removes_only_expired() {
        let ttl = TtlConfig { components: 60, ..Default::default() };
        let (tier, _dir) = tier_with_max(10_000, ttl).await;
        tier.set_component(&sized_component("old", 10)).await.unwrap();
        tier.set_component(&sized_component("fresh", 10)).await.unwrap();
        sqlx::query("UPDATE components SET cached_at = cached_at - 120 WHERE name = 'old'")
            .execute(tier.pool())
            .await
            .unwrap();

        assert_eq!(tier.expired_count().await.unwrap(), 1);
        assert_eq!(tier.cleanup_expired().await.unwrap(), 1);
        assert_eq!(tier.row_count().await.unwrap(), 1);
        assert_eq!(tier.expired_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_evict_lru_removes_oldest_access() {
        let (tier, _dir) = tier_with_max(10_000, TtlConfig::default()).await;
        tier.set_component(&sized_component("older", 10)).await.unwrap();
        tier.set_component(&sized_component("newer", 10)).await.unwrap();
        backdate_access(&tier, "older", 1_000).await;

        assert_eq!(tier.evict_lru(1).await.unwrap(), 1);
        assert!(tier.get_component("react", "older").await.unwrap().is_none());
        assert!(tier.get_component("react", "newer").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_evict_by_size_frees_requested_bytes() {
        let (tier, _dir) = tier_with_max(10_000, TtlConfig::default()).await;
        tier.set_component(&sized_component("a", 200)).await.unwrap();
        tier.set_component(&sized_component("b", 150)).await.unwrap();
        tier.set_component(&sized_component("c", 250)).await.unwrap();
        backdate_access(&tier, "a", 3_000).await;
        backdate_access(&tier, "b", 2_000).await;

        let before = tier.total_size_bytes().await.unwrap();
        let evicted = tier.evict_by_size(100).await.unwrap();
        assert_eq!(evicted, 1);
        // LRU order: "a" went first
        assert!(tier.get_component("react", "a").await.unwrap().is_none());
        assert!(before - tier.total_size_bytes().await.unwrap() >= 100);
    }

    #[tokio::test]
    async fn test_enforce_max_size_restores_invariant() {
        let (tier, _dir) = tier_with_max(500, TtlConfig::default()).await;
        tier.set_component(&sized_component("a", 200)).await.unwrap();
        tier.set_component(&sized_component("b", 150)).await.unwrap();
        tier.set_component(&sized_component("c", 250)).await.unwrap();
        backdate_access(&tier, "a", 3_000).await;

        let evicted = tier.enforce_max_size().await.unwrap();
        assert!(evicted >= 1);
        assert!(tier.total_size_bytes().await.unwrap() <= 500);
        // LRU-ordered eviction removed the oldest first
        assert!(tier.get_component("react", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_needs_maintenance_size_pressure() {
        let (tier, _dir) = tier_with_max(1_000, TtlConfig::default()).await;
        assert!(!tier.needs_maintenance().await.unwrap());
        tier.set_component(&sized_component("big", 950)).await.unwrap();
        assert!(tier.needs_maintenance().await.unwrap());
    }

    #[tokio::test]
    async fn test_needs_maintenance_expired_share() {
        let ttl = TtlConfig { components: 60, ..Default::default() };
        let (tier, _dir) = tier_with_max(1_000_000, ttl).await;
        for i in 0..10 {
            tier.set_component(&sized_component(&format!("c{i}"), 10)).await.unwrap();
        }
        assert!(!tier.needs_maintenance().await.unwrap());
        sqlx::query("UPDATE components SET cached_at = cached_at - 120 WHERE name IN ('c0', 'c1')")
            .execute(tier.pool())
            .await
            .unwrap();
        assert!(tier.needs_maintenance().await.unwrap());
    }

    #[tokio::test]
    async fn test_perform_maintenance_reports() {
        let ttl = TtlConfig { components: 60, ..Default::default() };
        let (tier, _dir) = tier_with_max(300, ttl).await;
        tier.set_component(&sized_component("expired", 100)).await.unwrap();
        tier.set_component(&sized_component("a", 200)).await.unwrap();
        tier.set_component(&sized_component("b", 200)).await.unwrap();
        sqlx::query("UPDATE components SET cached_at = cached_at - 120 WHERE name = 'expired'")
            .execute(tier.pool())
            .await
            .unwrap();
        backdate_access(&tier, "a", 1_000).await;

        let report = tier.perform_maintenance().await.unwrap();
        assert_eq!(report.expired_cleaned, 1);
        assert_eq!(report.items_evicted, 1);
        assert!(report.final_size <= 300);
        assert_eq!(report.final_count, 1);
    }
}
