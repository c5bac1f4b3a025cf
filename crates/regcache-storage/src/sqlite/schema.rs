//! Table definitions and connection setup for the persistent tier

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use regcache_core::{CacheError, Result, SqliteTierConfig};

pub(crate) const CREATE_COMPONENTS: &str = r#"
CREATE TABLE IF NOT EXISTS components (
    framework             TEXT NOT NULL,
    name                  TEXT NOT NULL,
    source_code           TEXT NOT NULL,
    demo_code             TEXT,
    metadata              TEXT,
    dependencies          TEXT NOT NULL DEFAULT '[]',
    registry_dependencies TEXT NOT NULL DEFAULT '[]',
    remote_sha            TEXT,
    file_size             INTEGER,
    last_modified         TEXT,
    cached_at             INTEGER NOT NULL,
    accessed_at           INTEGER NOT NULL,
    access_count          INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (framework, name)
)
"#;

pub(crate) const CREATE_BLOCKS: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    framework       TEXT NOT NULL,
    name            TEXT NOT NULL,
    category        TEXT,
    kind            TEXT NOT NULL DEFAULT 'simple',
    description     TEXT,
    files           TEXT NOT NULL DEFAULT '{}',
    structure       TEXT,
    dependencies    TEXT NOT NULL DEFAULT '[]',
    components_used TEXT NOT NULL DEFAULT '[]',
    total_size      INTEGER,
    remote_sha      TEXT,
    cached_at       INTEGER NOT NULL,
    accessed_at     INTEGER NOT NULL,
    access_count    INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (framework, name)
)
"#;

pub(crate) const CREATE_KV: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key          TEXT PRIMARY KEY,
    content_type TEXT NOT NULL,
    payload      BLOB NOT NULL,
    byte_size    INTEGER NOT NULL,
    ttl_seconds  INTEGER,
    cached_at    INTEGER NOT NULL,
    accessed_at  INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0
)
"#;

pub(crate) const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_components_accessed_at ON components (accessed_at)",
    "CREATE INDEX IF NOT EXISTS idx_blocks_accessed_at ON blocks (accessed_at)",
    "CREATE INDEX IF NOT EXISTS idx_kv_accessed_at ON kv (accessed_at)",
];

/// Open a pool for the configured database file and create the schema.
///
/// An externally managed pool can be passed to the tier instead; this is
/// the convenience path for embedders that only hold a file path.
pub async fn connect(config: &SqliteTierConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.path))
        .map_err(|e| CacheError::Connection(e.to_string()))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .journal_mode(if config.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        });

    // A shared in-memory database only exists per-connection
    let max_connections = if config.path.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|e| CacheError::Connection(e.to_string()))?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes if missing
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for sql in [CREATE_COMPONENTS, CREATE_BLOCKS, CREATE_KV] {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
    }
    for sql in CREATE_INDEXES {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
    }
    Ok(())
}
