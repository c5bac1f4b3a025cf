//! Persistent embedded-SQL tier (L2)
//!
//! Components and blocks live in structured tables keyed by
//! `(framework, name)`; metadata/directory keys and everything else go to
//! a generic `kv` table. Ages are computed in-database against
//! `unixepoch()`, and a [`CacheTier::get`] that finds an expired row
//! deletes it before reporting absence. [`SqliteTier::get_fresh`] is the
//! non-destructive variant: it treats expired rows as misses but leaves
//! them in place so a stale fallback can still serve them.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use regcache_core::{
    glob_match, validate_key, BlockEntry, BlockKind, CacheError, CacheTier, CacheValue,
    ComponentEntry, EntryMetadata, KeyKind, OpaqueEntry, RegistryKey, Result, SqliteTierConfig,
    TierName, TtlConfig,
};

use super::schema;

pub(crate) fn db_err(e: sqlx::Error) -> CacheError {
    CacheError::Backend(e.to_string())
}

fn json_err(e: serde_json::Error) -> CacheError {
    CacheError::Deserialization(e.to_string())
}

/// Persistent tier over a sqlite pool.
///
/// The pool may be owned by the embedder; `dispose` never closes it.
/// Cloning creates a new handle to the SAME database.
#[derive(Clone)]
pub struct SqliteTier {
    pool: SqlitePool,
    config: SqliteTierConfig,
    ttl: TtlConfig,
}

/// One row read back with its in-database age and effective TTL
struct RowRead {
    value: CacheValue,
    age: i64,
    ttl: i64,
}

impl RowRead {
    fn is_expired(&self) -> bool {
        self.ttl > 0 && self.age > self.ttl
    }
}

impl SqliteTier {
    /// Wrap an externally managed pool, creating the schema if missing
    pub async fn new(pool: SqlitePool, config: SqliteTierConfig, ttl: TtlConfig) -> Result<Self> {
        schema::migrate(&pool).await?;
        Ok(Self { pool, config, ttl })
    }

    /// Open the configured database file and wrap it
    pub async fn open(config: SqliteTierConfig, ttl: TtlConfig) -> Result<Self> {
        let pool = schema::connect(&config).await?;
        Ok(Self { pool, config, ttl })
    }

    /// The underlying pool; owned by the embedder when passed into
    /// [`SqliteTier::new`]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn config(&self) -> &SqliteTierConfig {
        &self.config
    }

    pub(crate) fn ttl_config(&self) -> &TtlConfig {
        &self.ttl
    }

    /// Fetch a component, honoring the configured TTL
    pub async fn get_component(&self, framework: &str, name: &str) -> Result<Option<ComponentEntry>> {
        let key = RegistryKey::component(framework, name);
        match self.get(&key).await? {
            Some(CacheValue::Component(entry)) => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    /// Fetch a block, honoring the configured TTL
    pub async fn get_block(&self, framework: &str, name: &str) -> Result<Option<BlockEntry>> {
        let key = RegistryKey::block(framework, name);
        match self.get(&key).await? {
            Some(CacheValue::Block(entry)) => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    /// Upsert a component
    pub async fn set_component(&self, entry: &ComponentEntry) -> Result<()> {
        upsert_component(&self.pool, entry).await
    }

    /// Upsert a block
    pub async fn set_block(&self, entry: &BlockEntry) -> Result<()> {
        upsert_block(&self.pool, entry).await
    }

    /// Freshness-checked read that leaves expired rows in place.
    ///
    /// The orchestrator uses this on the read path so a later stale
    /// fallback can still find the row when the registry is down.
    pub async fn get_fresh(&self, key: &str) -> Result<Option<CacheValue>> {
        let parsed = RegistryKey::parse(key)?;
        match self.read_row(&parsed, key).await? {
            Some(row) if row.is_expired() => Ok(None),
            Some(row) => {
                self.touch(&parsed, key).await?;
                Ok(Some(row.value))
            }
            None => Ok(None),
        }
    }

    /// Read one row with its age, without mutating anything
    async fn read_row(&self, parsed: &RegistryKey, key: &str) -> Result<Option<RowRead>> {
        let (sql, binds): (&str, Vec<String>) = match parsed.kind {
            KeyKind::Component => (
                "SELECT *, (unixepoch() - cached_at) AS age \
                 FROM components WHERE framework = ? AND name = ?",
                vec![
                    parsed.framework.clone().unwrap_or_default(),
                    parsed.name.clone().unwrap_or_default(),
                ],
            ),
            KeyKind::Block => (
                "SELECT *, (unixepoch() - cached_at) AS age \
                 FROM blocks WHERE framework = ? AND name = ?",
                vec![
                    parsed.framework.clone().unwrap_or_default(),
                    parsed.name.clone().unwrap_or_default(),
                ],
            ),
            _ => (
                "SELECT *, (unixepoch() - cached_at) AS age FROM kv WHERE key = ?",
                vec![key.to_string()],
            ),
        };

        let mut query = sqlx::query(sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let Some(row) = query.fetch_optional(&self.pool).await.map_err(db_err)? else {
            return Ok(None);
        };

        let age: i64 = row.try_get("age").map_err(db_err)?;
        let (value, ttl) = match parsed.kind {
            KeyKind::Component => (
                CacheValue::Component(component_from_row(&row)?),
                self.ttl.components as i64,
            ),
            KeyKind::Block => (
                CacheValue::Block(block_from_row(&row)?),
                self.ttl.blocks as i64,
            ),
            _ => {
                let row_ttl: Option<i64> = row.try_get("ttl_seconds").map_err(db_err)?;
                (
                    CacheValue::Opaque(OpaqueEntry {
                        content_type: row.try_get("content_type").map_err(db_err)?,
                        payload: row.try_get("payload").map_err(db_err)?,
                    }),
                    row_ttl.unwrap_or(self.ttl.metadata as i64),
                )
            }
        };
        Ok(Some(RowRead { value, age, ttl }))
    }

    /// Bump access tracking for a hit
    async fn touch(&self, parsed: &RegistryKey, key: &str) -> Result<()> {
        match parsed.kind {
            KeyKind::Component | KeyKind::Block => {
                let table = if parsed.kind == KeyKind::Component {
                    "components"
                } else {
                    "blocks"
                };
                let sql = format!(
                    "UPDATE {table} SET accessed_at = unixepoch(), \
                     access_count = access_count + 1 WHERE framework = ? AND name = ?"
                );
                sqlx::query(&sql)
                    .bind(parsed.framework.as_deref().unwrap_or_default())
                    .bind(parsed.name.as_deref().unwrap_or_default())
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
            }
            _ => {
                sqlx::query(
                    "UPDATE kv SET accessed_at = unixepoch(), \
                     access_count = access_count + 1 WHERE key = ?",
                )
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            }
        }
        Ok(())
    }

    async fn delete_row(&self, parsed: &RegistryKey, key: &str) -> Result<u64> {
        let affected = match parsed.kind {
            KeyKind::Component => {
                sqlx::query("DELETE FROM components WHERE framework = ? AND name = ?")
                    .bind(parsed.framework.as_deref().unwrap_or_default())
                    .bind(parsed.name.as_deref().unwrap_or_default())
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?
                    .rows_affected()
            }
            KeyKind::Block => sqlx::query("DELETE FROM blocks WHERE framework = ? AND name = ?")
                .bind(parsed.framework.as_deref().unwrap_or_default())
                .bind(parsed.name.as_deref().unwrap_or_default())
                .execute(&self.pool)
                .await
                .map_err(db_err)?
                .rows_affected(),
            _ => sqlx::query("DELETE FROM kv WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(db_err)?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn get_many_structured(
        &self,
        table: &str,
        pairs: &[(String, String)],
    ) -> Result<HashMap<(String, String), SqliteRow>> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }

        // One batched update so access counters and returned rows stay
        // consistent.
        let placeholders = vec!["(?, ?)"; pairs.len()].join(", ");
        let sql = format!(
            "UPDATE {table} SET accessed_at = unixepoch(), access_count = access_count + 1 \
             WHERE (framework, name) IN (VALUES {placeholders}) \
             RETURNING *, (unixepoch() - cached_at) AS age",
        );

        let mut query = sqlx::query(&sql);
        for (framework, name) in pairs {
            query = query.bind(framework).bind(name);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;

        let ttl = match table {
            "components" => self.ttl.components as i64,
            _ => self.ttl.blocks as i64,
        };

        let mut out = HashMap::new();
        for row in rows {
            let framework: String = row.try_get("framework").map_err(db_err)?;
            let name: String = row.try_get("name").map_err(db_err)?;
            let age: i64 = row.try_get("age").map_err(db_err)?;
            if ttl > 0 && age > ttl {
                let sql = format!("DELETE FROM {table} WHERE framework = ? AND name = ?");
                sqlx::query(&sql)
                    .bind(&framework)
                    .bind(&name)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
                continue;
            }
            out.insert((framework, name), row);
        }
        Ok(out)
    }

    fn check_structured_value(key: &RegistryKey, value: &CacheValue) -> Result<()> {
        let (framework, name) = (key.framework.as_deref(), key.name.as_deref());
        if value.framework() != framework || value.name() != name {
            return Err(CacheError::Validation(
                "value framework/name does not match key".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTier for SqliteTier {
    fn tier(&self) -> TierName {
        TierName::Persistent
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let parsed = RegistryKey::parse(key)?;
        match self.read_row(&parsed, key).await? {
            Some(row) if row.is_expired() => {
                // Expired rows are removed before absence is reported
                self.delete_row(&parsed, key).await?;
                Ok(None)
            }
            Some(row) => {
                self.touch(&parsed, key).await?;
                Ok(Some(row.value))
            }
            None => Ok(None),
        }
    }

    async fn get_stale(&self, key: &str) -> Result<Option<(CacheValue, u64)>> {
        let parsed = RegistryKey::parse(key)?;
        Ok(self
            .read_row(&parsed, key)
            .await?
            .map(|row| (row.value, row.age.max(0) as u64)))
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl_seconds: Option<u64>) -> Result<()> {
        let parsed = RegistryKey::parse(key)?;
        match (parsed.kind, value) {
            (KeyKind::Component, CacheValue::Component(entry)) => {
                Self::check_structured_value(&parsed, value)?;
                self.set_component(entry).await
            }
            (KeyKind::Block, CacheValue::Block(entry)) => {
                Self::check_structured_value(&parsed, value)?;
                self.set_block(entry).await
            }
            (KeyKind::Component | KeyKind::Block, _) => Err(CacheError::Validation(format!(
                "structured key {key} requires a matching structured value"
            ))),
            (_, CacheValue::Opaque(entry)) => upsert_kv(&self.pool, key, entry, ttl_seconds).await,
            (_, _) => Err(CacheError::Validation(format!(
                "key {key} takes an opaque value"
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let parsed = RegistryKey::parse(key)?;
        Ok(self.delete_row(&parsed, key).await? > 0)
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<CacheValue>>> {
        // Partition by kind, batch the structured kinds, then reassemble in
        // input order.
        let mut components = Vec::new();
        let mut blocks = Vec::new();
        let mut parsed_keys = Vec::with_capacity(keys.len());
        for key in keys {
            let parsed = RegistryKey::parse(key)?;
            match parsed.kind {
                KeyKind::Component => components.push((
                    parsed.framework.clone().unwrap_or_default(),
                    parsed.name.clone().unwrap_or_default(),
                )),
                KeyKind::Block => blocks.push((
                    parsed.framework.clone().unwrap_or_default(),
                    parsed.name.clone().unwrap_or_default(),
                )),
                _ => {}
            }
            parsed_keys.push(parsed);
        }

        let component_rows = self.get_many_structured("components", &components).await?;
        let block_rows = self.get_many_structured("blocks", &blocks).await?;

        let mut results = Vec::with_capacity(keys.len());
        for (key, parsed) in keys.iter().zip(parsed_keys) {
            let value = match parsed.kind {
                KeyKind::Component => {
                    let pk = (
                        parsed.framework.unwrap_or_default(),
                        parsed.name.unwrap_or_default(),
                    );
                    component_rows
                        .get(&pk)
                        .map(|row| component_from_row(row).map(CacheValue::Component))
                        .transpose()?
                }
                KeyKind::Block => {
                    let pk = (
                        parsed.framework.unwrap_or_default(),
                        parsed.name.unwrap_or_default(),
                    );
                    block_rows
                        .get(&pk)
                        .map(|row| block_from_row(row).map(CacheValue::Block))
                        .transpose()?
                }
                _ => self.get(key).await?,
            };
            results.push(value);
        }
        Ok(results)
    }

    async fn set_many(&self, entries: &[(String, CacheValue, Option<u64>)]) -> Result<()> {
        // All upserts in one transaction: either all are visible or none.
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for (key, value, ttl) in entries {
            let parsed = RegistryKey::parse(key)?;
            match (parsed.kind, value) {
                (KeyKind::Component, CacheValue::Component(entry)) => {
                    Self::check_structured_value(&parsed, value)?;
                    upsert_component(&mut *tx, entry).await?;
                }
                (KeyKind::Block, CacheValue::Block(entry)) => {
                    Self::check_structured_value(&parsed, value)?;
                    upsert_block(&mut *tx, entry).await?;
                }
                (KeyKind::Component | KeyKind::Block, _) => {
                    return Err(CacheError::Validation(format!(
                        "structured key {key} requires a matching structured value"
                    )));
                }
                (_, CacheValue::Opaque(entry)) => {
                    upsert_kv(&mut *tx, key, entry, *ttl).await?;
                }
                (_, _) => {
                    return Err(CacheError::Validation(format!(
                        "key {key} takes an opaque value"
                    )));
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        let rows = sqlx::query("SELECT framework, name FROM components")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        for row in rows {
            let framework: String = row.try_get("framework").map_err(db_err)?;
            let name: String = row.try_get("name").map_err(db_err)?;
            keys.push(RegistryKey::component(&framework, &name));
        }

        let rows = sqlx::query("SELECT framework, name FROM blocks")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        for row in rows {
            let framework: String = row.try_get("framework").map_err(db_err)?;
            let name: String = row.try_get("name").map_err(db_err)?;
            keys.push(RegistryKey::block(&framework, &name));
        }

        let rows = sqlx::query("SELECT key FROM kv")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        for row in rows {
            keys.push(row.try_get("key").map_err(db_err)?);
        }

        keys.retain(|k| glob_match(pattern, k));
        Ok(keys)
    }

    async fn len(&self) -> Result<usize> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM components) + (SELECT COUNT(*) FROM blocks) \
             + (SELECT COUNT(*) FROM kv) AS total",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let total: i64 = row.try_get("total").map_err(db_err)?;
        Ok(total as usize)
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
        let parsed = RegistryKey::parse(key)?;
        let (sql, binds, ttl): (&str, Vec<String>, Option<u64>) = match parsed.kind {
            KeyKind::Component => (
                "SELECT COALESCE(file_size, 0) AS size, cached_at, accessed_at, access_count \
                 FROM components WHERE framework = ? AND name = ?",
                vec![
                    parsed.framework.unwrap_or_default(),
                    parsed.name.unwrap_or_default(),
                ],
                Some(self.ttl.components),
            ),
            KeyKind::Block => (
                "SELECT COALESCE(total_size, 0) AS size, cached_at, accessed_at, access_count \
                 FROM blocks WHERE framework = ? AND name = ?",
                vec![
                    parsed.framework.unwrap_or_default(),
                    parsed.name.unwrap_or_default(),
                ],
                Some(self.ttl.blocks),
            ),
            _ => (
                "SELECT byte_size AS size, cached_at, accessed_at, access_count, ttl_seconds \
                 FROM kv WHERE key = ?",
                vec![key.to_string()],
                None,
            ),
        };

        let mut query = sqlx::query(sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let Some(row) = query.fetch_optional(&self.pool).await.map_err(db_err)? else {
            return Ok(None);
        };

        let ttl_seconds = match ttl {
            Some(t) => Some(t),
            None => {
                let row_ttl: Option<i64> = row.try_get("ttl_seconds").map_err(db_err)?;
                row_ttl.map(|t| t as u64).or(Some(self.ttl.metadata))
            }
        };

        let size: i64 = row.try_get("size").map_err(db_err)?;
        Ok(Some(EntryMetadata {
            size: size.max(0) as u64,
            cached_at: row.try_get("cached_at").map_err(db_err)?,
            accessed_at: row.try_get("accessed_at").map_err(db_err)?,
            access_count: row.try_get::<i64, _>("access_count").map_err(db_err)?.max(0) as u64,
            ttl_seconds,
        }))
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for sql in ["DELETE FROM components", "DELETE FROM blocks", "DELETE FROM kv"] {
            sqlx::query(sql).execute(&mut *tx).await.map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}

fn component_from_row(row: &SqliteRow) -> Result<ComponentEntry> {
    let metadata: Option<String> = row.try_get("metadata").map_err(db_err)?;
    let dependencies: String = row.try_get("dependencies").map_err(db_err)?;
    let registry_dependencies: String = row.try_get("registry_dependencies").map_err(db_err)?;
    Ok(ComponentEntry {
        framework: row.try_get("framework").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        source_code: row.try_get("source_code").map_err(db_err)?,
        demo_code: row.try_get("demo_code").map_err(db_err)?,
        metadata: metadata
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(json_err)?,
        dependencies: serde_json::from_str(&dependencies).map_err(json_err)?,
        registry_dependencies: serde_json::from_str(&registry_dependencies).map_err(json_err)?,
        remote_sha: row.try_get("remote_sha").map_err(db_err)?,
        file_size: row
            .try_get::<Option<i64>, _>("file_size")
            .map_err(db_err)?
            .map(|v| v.max(0) as u64),
        last_modified: row.try_get("last_modified").map_err(db_err)?,
    })
}

fn block_from_row(row: &SqliteRow) -> Result<BlockEntry> {
    let kind: String = row.try_get("kind").map_err(db_err)?;
    let files: String = row.try_get("files").map_err(db_err)?;
    let structure: Option<String> = row.try_get("structure").map_err(db_err)?;
    let dependencies: String = row.try_get("dependencies").map_err(db_err)?;
    let components_used: String = row.try_get("components_used").map_err(db_err)?;
    Ok(BlockEntry {
        framework: row.try_get("framework").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        category: row.try_get("category").map_err(db_err)?,
        kind: BlockKind::from_str(&kind)?,
        description: row.try_get("description").map_err(db_err)?,
        files: serde_json::from_str(&files).map_err(json_err)?,
        structure: structure
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(json_err)?,
        dependencies: serde_json::from_str(&dependencies).map_err(json_err)?,
        components_used: serde_json::from_str(&components_used).map_err(json_err)?,
        total_size: row
            .try_get::<Option<i64>, _>("total_size")
            .map_err(db_err)?
            .map(|v| v.max(0) as u64),
        remote_sha: row.try_get("remote_sha").map_err(db_err)?,
    })
}

async fn upsert_component<'e, E>(executor: E, entry: &ComponentEntry) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let file_size = entry.file_size.unwrap_or(entry.source_code.len() as u64) as i64;
    let metadata = entry
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| CacheError::Serialization(e.to_string()))?;
    sqlx::query(
        "INSERT INTO components \
         (framework, name, source_code, demo_code, metadata, dependencies, \
          registry_dependencies, remote_sha, file_size, last_modified, \
          cached_at, accessed_at, access_count) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, unixepoch(), unixepoch(), 0) \
         ON CONFLICT(framework, name) DO UPDATE SET \
            source_code = excluded.source_code, \
            demo_code = excluded.demo_code, \
            metadata = excluded.metadata, \
            dependencies = excluded.dependencies, \
            registry_dependencies = excluded.registry_dependencies, \
            remote_sha = excluded.remote_sha, \
            file_size = excluded.file_size, \
            last_modified = excluded.last_modified, \
            cached_at = unixepoch(), \
            accessed_at = unixepoch(), \
            access_count = components.access_count + 1",
    )
    .bind(&entry.framework)
    .bind(&entry.name)
    .bind(&entry.source_code)
    .bind(&entry.demo_code)
    .bind(metadata)
    .bind(serde_json::to_string(&entry.dependencies).map_err(json_err)?)
    .bind(serde_json::to_string(&entry.registry_dependencies).map_err(json_err)?)
    .bind(&entry.remote_sha)
    .bind(file_size)
    .bind(&entry.last_modified)
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn upsert_block<'e, E>(executor: E, entry: &BlockEntry) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let total_size = entry
        .total_size
        .unwrap_or_else(|| entry.files.values().map(|f| f.len() as u64).sum())
        as i64;
    let structure = entry
        .structure
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| CacheError::Serialization(e.to_string()))?;
    sqlx::query(
        "INSERT INTO blocks \
         (framework, name, category, kind, description, files, structure, \
          dependencies, components_used, total_size, remote_sha, \
          cached_at, accessed_at, access_count) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, unixepoch(), unixepoch(), 0) \
         ON CONFLICT(framework, name) DO UPDATE SET \
            category = excluded.category, \
            kind = excluded.kind, \
            description = excluded.description, \
            files = excluded.files, \
            structure = excluded.structure, \
            dependencies = excluded.dependencies, \
            components_used = excluded.components_used, \
            total_size = excluded.total_size, \
            remote_sha = excluded.remote_sha, \
            cached_at = unixepoch(), \
            accessed_at = unixepoch(), \
            access_count = blocks.access_count + 1",
    )
    .bind(&entry.framework)
    .bind(&entry.name)
    .bind(&entry.category)
    .bind(entry.kind.as_str())
    .bind(&entry.description)
    .bind(serde_json::to_string(&entry.files).map_err(json_err)?)
    .bind(structure)
    .bind(serde_json::to_string(&entry.dependencies).map_err(json_err)?)
    .bind(serde_json::to_string(&entry.components_used).map_err(json_err)?)
    .bind(total_size)
    .bind(&entry.remote_sha)
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn upsert_kv<'e, E>(
    executor: E,
    key: &str,
    entry: &OpaqueEntry,
    ttl_seconds: Option<u64>,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    validate_key(key)?;
    sqlx::query(
        "INSERT INTO kv (key, content_type, payload, byte_size, ttl_seconds, \
                         cached_at, accessed_at, access_count) \
         VALUES (?, ?, ?, ?, ?, unixepoch(), unixepoch(), 0) \
         ON CONFLICT(key) DO UPDATE SET \
            content_type = excluded.content_type, \
            payload = excluded.payload, \
            byte_size = excluded.byte_size, \
            ttl_seconds = excluded.ttl_seconds, \
            cached_at = unixepoch(), \
            accessed_at = unixepoch(), \
            access_count = kv.access_count + 1",
    )
    .bind(key)
    .bind(&entry.content_type)
    .bind(&entry.payload)
    .bind(entry.payload.len() as i64)
    .bind(ttl_seconds.map(|t| t as i64))
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}
