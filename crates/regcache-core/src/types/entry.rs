//! Cached value types
//!
//! The cache stores three shapes of value: single registry components,
//! multi-file blocks, and opaque payloads for metadata/directory keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// A single registry component: one source file plus optional demo and
/// registry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub framework: String,
    pub name: String,
    pub source_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub registry_dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// Block complexity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Simple,
    Complex,
}

impl Default for BlockKind {
    fn default() -> Self {
        Self::Simple
    }
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Simple => "simple",
            BlockKind::Complex => "complex",
        }
    }
}

impl std::str::FromStr for BlockKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simple" => Ok(BlockKind::Simple),
            "complex" => Ok(BlockKind::Complex),
            other => Err(CacheError::Deserialization(format!(
                "unknown block kind: {other}"
            ))),
        }
    }
}

/// A block: a bundle of files making up a larger UI section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub framework: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Path -> file contents
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub components_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_sha: Option<String>,
}

/// Raw payload for metadata/directory keys and anything on the generic path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueEntry {
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl OpaqueEntry {
    /// JSON payload convenience constructor
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            content_type: "application/json".to_string(),
            payload: serde_json::to_vec(value).unwrap_or_default(),
        }
    }
}

/// Semantic union over everything the cache stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheValue {
    Component(ComponentEntry),
    Block(BlockEntry),
    Opaque(OpaqueEntry),
}

impl CacheValue {
    /// Size in bytes of the canonical JSON encoding.
    ///
    /// Used for per-entry accounting on every tier.
    pub fn estimated_size(&self) -> u64 {
        serde_json::to_vec(self).map(|v| v.len() as u64).unwrap_or(0)
    }

    /// Framework segment, when the value is structured
    pub fn framework(&self) -> Option<&str> {
        match self {
            CacheValue::Component(c) => Some(&c.framework),
            CacheValue::Block(b) => Some(&b.framework),
            CacheValue::Opaque(_) => None,
        }
    }

    /// Name segment, when the value is structured
    pub fn name(&self) -> Option<&str> {
        match self {
            CacheValue::Component(c) => Some(&c.name),
            CacheValue::Block(b) => Some(&b.name),
            CacheValue::Opaque(_) => None,
        }
    }

    /// Encode to the canonical JSON byte form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Decode from the canonical JSON byte form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    /// Whether a named field is present and non-empty.
    ///
    /// The fallback chain uses this for required-field validation of
    /// possibly-partial values.
    pub fn field_is_populated(&self, field: &str) -> bool {
        match self {
            CacheValue::Component(c) => match field {
                "framework" => !c.framework.is_empty(),
                "name" => !c.name.is_empty(),
                "source_code" => !c.source_code.is_empty(),
                "demo_code" => c.demo_code.as_deref().is_some_and(|s| !s.is_empty()),
                "metadata" => c.metadata.is_some(),
                "dependencies" => !c.dependencies.is_empty(),
                _ => false,
            },
            CacheValue::Block(b) => match field {
                "framework" => !b.framework.is_empty(),
                "name" => !b.name.is_empty(),
                "files" => !b.files.is_empty(),
                "structure" => b.structure.is_some(),
                "description" => b.description.as_deref().is_some_and(|s| !s.is_empty()),
                _ => false,
            },
            CacheValue::Opaque(o) => match field {
                "payload" => !o.payload.is_empty(),
                "content_type" => !o.content_type.is_empty(),
                _ => false,
            },
        }
    }
}
