//! Per-entry accounting metadata

use serde::{Deserialize, Serialize};

/// Accounting columns every tier keeps alongside a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Size of the stored value in bytes
    pub size: u64,
    /// Unix epoch seconds when the entry was written
    pub cached_at: i64,
    /// Unix epoch seconds of the last read
    pub accessed_at: i64,
    /// Number of reads since the entry was written
    pub access_count: u64,
    /// Effective TTL in seconds, if the entry expires
    pub ttl_seconds: Option<u64>,
}

impl EntryMetadata {
    /// Age of the entry relative to `now` (epoch seconds)
    pub fn age_seconds(&self, now: i64) -> u64 {
        now.saturating_sub(self.cached_at).max(0) as u64
    }

    /// Whether the entry is past its TTL relative to `now`
    pub fn is_expired(&self, now: i64) -> bool {
        match self.ttl_seconds {
            Some(ttl) if ttl > 0 => self.age_seconds(now) > ttl,
            _ => false,
        }
    }
}

/// Current unix time in seconds
pub fn epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
