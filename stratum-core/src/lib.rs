//! Stratum Core - Identity and Operation Types
//!
//! Pure data structures with no behavior beyond construction and
//! validation. All other crates depend on this. This crate contains
//! ONLY data types - no runtime logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub mod error;
pub mod health;

pub use error::{
    ConfigError, JobError, StoreError, StratumError, StratumResult, ValidationError,
    WatchdogError,
};
pub use health::{
    format_uptime, HealthReport, HealthStatus, LastError, OperationCounts, ResourceSnapshot,
    ScalingDirection, ScalingRecommendation, VolumeSignal,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 digest of normalized operation arguments.
pub type ArgsDigest = [u8; 32];

/// Isolation key partitioning cache entries and trails so unrelated
/// workloads don't interfere.
///
/// A scope is typically a tenant or project identifier supplied by the
/// caller. Callers that don't partition their workload use
/// [`ScopeId::global`], which maps every operation into one shared
/// partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

/// Reserved scope name for unpartitioned callers.
const GLOBAL_SCOPE: &str = "_global";

impl ScopeId {
    /// Create a scope from a caller-supplied identifier.
    ///
    /// Blank identifiers are rejected - a scope that silently collapses
    /// to nothing would merge unrelated workloads into one partition.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "scope".to_string(),
                reason: "scope identifier must not be blank".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// The shared scope used when the caller doesn't partition.
    pub fn global() -> Self {
        Self(GLOBAL_SCOPE.to_string())
    }

    /// Whether this is the shared global scope.
    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_SCOPE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// OPERATION TYPES
// ============================================================================

/// Kind discriminator for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Whether this operation mutates store state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, OperationKind::Query)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized descriptor of an operation's shape, used as the trail key.
///
/// A signature captures WHAT KIND of operation ran - the kind, the target
/// collection, and the shape of the filter (its top-level field names,
/// sorted) - not the literal argument values. Two queries against the
/// same collection filtering on the same fields with different values
/// share one signature, so reinforcement accumulates on the access
/// pattern rather than on individual requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternSignature {
    kind: OperationKind,
    collection: String,
    filter_shape: Vec<String>,
}

impl PatternSignature {
    /// Build a signature from an operation and its optional filter.
    ///
    /// Only top-level object keys of the filter contribute to the shape;
    /// non-object filters contribute nothing.
    pub fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        filter: Option<&serde_json::Value>,
    ) -> Self {
        let mut filter_shape: Vec<String> = filter
            .and_then(|f| f.as_object())
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();
        filter_shape.sort();
        Self {
            kind,
            collection: collection.into(),
            filter_shape,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn filter_shape(&self) -> &[String] {
        &self.filter_shape
    }
}

impl fmt::Display for PatternSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{{{}}}",
            self.kind,
            self.collection,
            self.filter_shape.join(",")
        )
    }
}

// ============================================================================
// ARGUMENT NORMALIZATION
// ============================================================================

/// Compute the SHA-256 digest of a JSON value in canonical form.
///
/// Object keys are sorted recursively before hashing so that two
/// argument objects differing only in key order produce the same digest.
pub fn hash_args(args: &serde_json::Value) -> ArgsDigest {
    let mut hasher = Sha256::new();
    canonical_write(args, &mut hasher);
    let result = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&result);
    digest
}

/// Feed a JSON value into the hasher with object keys sorted.
fn canonical_write(value: &serde_json::Value, hasher: &mut Sha256) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(b":");
                canonical_write(&map[key], hasher);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        serde_json::Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                canonical_write(item, hasher);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        other => hasher.update(other.to_string().as_bytes()),
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn json_leaf_strategy() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            any::<i64>().prop_map(|n| serde_json::Value::from(n)),
            any::<bool>().prop_map(serde_json::Value::Bool),
            "[a-z]{0,8}".prop_map(serde_json::Value::from),
        ]
    }

    proptest! {
        /// Property: hashing is deterministic.
        #[test]
        fn prop_hash_args_deterministic(
            keys in proptest::collection::vec("[a-z]{1,6}", 0..5),
            leaf in json_leaf_strategy(),
        ) {
            let mut map = serde_json::Map::new();
            for key in keys {
                map.insert(key, leaf.clone());
            }
            let value = serde_json::Value::Object(map);
            prop_assert_eq!(hash_args(&value), hash_args(&value.clone()));
        }

        /// Property: a signature's filter shape is always sorted.
        #[test]
        fn prop_signature_shape_sorted(
            keys in proptest::collection::vec("[a-z]{1,6}", 0..6),
        ) {
            let mut map = serde_json::Map::new();
            for key in &keys {
                map.insert(key.clone(), serde_json::Value::Null);
            }
            let filter = serde_json::Value::Object(map);
            let sig = PatternSignature::new(OperationKind::Query, "c", Some(&filter));
            let shape = sig.filter_shape();
            for pair in shape.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
        }
    }
}
