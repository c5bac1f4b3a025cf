//! Structured registry key parsing and construction
//!
//! Keys are colon-delimited: `component:react:button`,
//! `block:svelte:dashboard-01`, `metadata:rate-limit`,
//! `directory:react/src/components`. Unknown shapes parse as
//! [`KeyKind::Other`] and are routed to the generic key/value path.

use crate::error::{CacheError, Result};

/// Maximum accepted key length
pub const MAX_KEY_LEN: usize = 255;

/// The kind of item a key addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Single component source (`component:framework:name`)
    Component,
    /// Block bundle (`block:framework:name`)
    Block,
    /// Registry metadata (`metadata:sub`)
    Metadata,
    /// Directory tree listing (`directory:sub`)
    Directory,
    /// Anything else; stored on the generic key/value path
    Other,
}

impl KeyKind {
    /// Stable label used in logs and stats
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Component => "component",
            KeyKind::Block => "block",
            KeyKind::Metadata => "metadata",
            KeyKind::Directory => "directory",
            KeyKind::Other => "other",
        }
    }
}

/// A parsed registry key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryKey {
    /// What the key addresses
    pub kind: KeyKind,
    /// Framework segment (components and blocks)
    pub framework: Option<String>,
    /// Item name segment (components and blocks)
    pub name: Option<String>,
    /// Trailing sub-path (metadata/directory keys, or a component subkey)
    pub sub: Option<String>,
}

impl RegistryKey {
    /// Parse a raw key string.
    ///
    /// Validates length and character set; shape mismatches are tolerated
    /// and labeled [`KeyKind::Other`].
    pub fn parse(key: &str) -> Result<Self> {
        validate_key(key)?;

        let mut parts = key.splitn(4, ':');
        let head = parts.next().unwrap_or_default();

        match head {
            "component" | "block" => {
                let framework = parts.next().filter(|s| !s.is_empty());
                let name = parts.next().filter(|s| !s.is_empty());
                let sub = parts.next().filter(|s| !s.is_empty());
                match (framework, name) {
                    (Some(fw), Some(n)) => Ok(Self {
                        kind: if head == "component" {
                            KeyKind::Component
                        } else {
                            KeyKind::Block
                        },
                        framework: Some(fw.to_string()),
                        name: Some(n.to_string()),
                        sub: sub.map(str::to_string),
                    }),
                    // Missing required segments: callers route this to the
                    // generic path instead of rejecting.
                    _ => Ok(Self::other()),
                }
            }
            "metadata" | "directory" => {
                let rest = key[head.len()..].strip_prefix(':').unwrap_or_default();
                if rest.is_empty() {
                    return Ok(Self::other());
                }
                Ok(Self {
                    kind: if head == "metadata" {
                        KeyKind::Metadata
                    } else {
                        KeyKind::Directory
                    },
                    framework: None,
                    name: None,
                    sub: Some(rest.to_string()),
                })
            }
            _ => Ok(Self::other()),
        }
    }

    fn other() -> Self {
        Self {
            kind: KeyKind::Other,
            framework: None,
            name: None,
            sub: None,
        }
    }

    /// Build a component key
    pub fn component(framework: &str, name: &str) -> String {
        format!("component:{}:{}", framework, name)
    }

    /// Build a block key
    pub fn block(framework: &str, name: &str) -> String {
        format!("block:{}:{}", framework, name)
    }

    /// Build a metadata key
    pub fn metadata(sub: &str) -> String {
        format!("metadata:{}", sub)
    }

    /// Build a directory key
    pub fn directory(sub: &str) -> String {
        format!("directory:{}", sub)
    }

    /// Whether this key routes to structured component/block storage
    pub fn is_structured(&self) -> bool {
        matches!(self.kind, KeyKind::Component | KeyKind::Block)
    }
}

/// Validate a raw key at an entry point.
///
/// Keys are bounded at [`MAX_KEY_LEN`] bytes and must not contain control
/// characters.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::Validation("empty key".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(CacheError::Validation(format!(
            "key exceeds {} bytes: {} bytes",
            MAX_KEY_LEN,
            key.len()
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(CacheError::Validation(
            "key contains control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_component() {
        let key = RegistryKey::parse("component:react:button").unwrap();
        assert_eq!(key.kind, KeyKind::Component);
        assert_eq!(key.framework.as_deref(), Some("react"));
        assert_eq!(key.name.as_deref(), Some("button"));
        assert!(key.sub.is_none());
        assert!(key.is_structured());
    }

    #[test]
    fn test_parse_component_with_subkey() {
        let key = RegistryKey::parse("component:react:button:demo").unwrap();
        assert_eq!(key.kind, KeyKind::Component);
        assert_eq!(key.sub.as_deref(), Some("demo"));
    }

    #[test]
    fn test_parse_block() {
        let key = RegistryKey::parse("block:svelte:dashboard-01").unwrap();
        assert_eq!(key.kind, KeyKind::Block);
        assert_eq!(key.framework.as_deref(), Some("svelte"));
        assert_eq!(key.name.as_deref(), Some("dashboard-01"));
    }

    #[test]
    fn test_parse_metadata_and_directory() {
        let key = RegistryKey::parse("metadata:rate-limit").unwrap();
        assert_eq!(key.kind, KeyKind::Metadata);
        assert_eq!(key.sub.as_deref(), Some("rate-limit"));

        let key = RegistryKey::parse("directory:react/src/ui").unwrap();
        assert_eq!(key.kind, KeyKind::Directory);
        assert_eq!(key.sub.as_deref(), Some("react/src/ui"));
        assert!(!key.is_structured());
    }

    #[test]
    fn test_unknown_shapes_are_other() {
        assert_eq!(RegistryKey::parse("session:abc").unwrap().kind, KeyKind::Other);
        assert_eq!(RegistryKey::parse("component").unwrap().kind, KeyKind::Other);
        assert_eq!(RegistryKey::parse("component:react").unwrap().kind, KeyKind::Other);
        assert_eq!(RegistryKey::parse("metadata:").unwrap().kind, KeyKind::Other);
    }

    #[test]
    fn test_validation_rejects_bad_keys() {
        assert!(RegistryKey::parse("").is_err());
        assert!(RegistryKey::parse("bad\nkey").is_err());
        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(RegistryKey::parse(&long).is_err());
        let exact = "k".repeat(MAX_KEY_LEN);
        assert!(RegistryKey::parse(&exact).is_ok());
    }

    #[test]
    fn test_build_round_trip() {
        let raw = RegistryKey::component("react", "button");
        assert_eq!(raw, "component:react:button");
        let parsed = RegistryKey::parse(&raw).unwrap();
        assert_eq!(parsed.kind, KeyKind::Component);

        assert_eq!(RegistryKey::block("react", "login-02"), "block:react:login-02");
        assert_eq!(RegistryKey::metadata("rate-limit"), "metadata:rate-limit");
    }
}
