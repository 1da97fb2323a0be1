//! Cache namespace definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical partition of the cache.
///
/// Every namespace has its own default TTL and capacity. The same key in two
/// namespaces refers to two unrelated entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Slow-changing reference data (long TTL)
    Static,
    /// Live data that goes stale quickly (short TTL)
    Volatile,
    /// Caller-defined partition
    Custom(String),
}

impl Namespace {
    /// Create a caller-defined namespace
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// Name used in logs and statistics
    pub fn as_str(&self) -> &str {
        match self {
            Self::Static => "static",
            Self::Volatile => "volatile",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_names() {
        assert_eq!(Namespace::Static.to_string(), "static");
        assert_eq!(Namespace::Volatile.as_str(), "volatile");
        assert_eq!(Namespace::custom("favorites").as_str(), "favorites");
    }

    #[test]
    fn test_custom_namespaces_compare_by_name() {
        assert_eq!(Namespace::custom("a"), Namespace::Custom("a".to_string()));
        assert_ne!(Namespace::custom("a"), Namespace::custom("b"));
    }
}
