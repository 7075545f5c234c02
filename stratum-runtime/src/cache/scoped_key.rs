//! Scope-bound cache key system.
//!
//! The key insight is that `ScopedKey`'s private constructor makes
//! cross-scope access UNCOMPILABLE. You cannot construct a key without
//! explicitly providing a scope.

use stratum_core::{hash_args, ArgsDigest, OperationKind, ScopeId};

/// A cache key that is bound to a specific scope.
///
/// # Design
///
/// The private inner struct ensures that a `ScopedKey` can ONLY be
/// constructed via the `new()` method, which requires a scope. Two
/// requests with identical operations in different scopes therefore
/// always occupy distinct cache slots.
///
/// # Derivation
///
/// A key is scope + operation kind + target collection + SHA-256 of the
/// operation arguments in canonical (key-sorted) JSON form, so argument
/// objects differing only in key order land on the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    /// Private inner data - cannot be constructed externally
    inner: ScopedKeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopedKeyInner {
    scope: ScopeId,
    kind: OperationKind,
    collection: String,
    args_digest: ArgsDigest,
}

impl ScopedKey {
    /// Create a new scope-bound cache key.
    ///
    /// This is the ONLY way to construct a `ScopedKey`, ensuring that
    /// all cache operations are scope-isolated by construction.
    pub fn new(
        scope: ScopeId,
        kind: OperationKind,
        collection: impl Into<String>,
        args: &serde_json::Value,
    ) -> Self {
        Self {
            inner: ScopedKeyInner {
                scope,
                kind,
                collection: collection.into(),
                args_digest: hash_args(args),
            },
        }
    }

    /// The scope this key is bound to.
    pub fn scope(&self) -> &ScopeId {
        &self.inner.scope
    }

    /// The operation kind for this key.
    pub fn kind(&self) -> OperationKind {
        self.inner.kind
    }

    /// The target collection for this key.
    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    /// The canonical argument digest.
    pub fn args_digest(&self) -> &ArgsDigest {
        &self.inner.args_digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(name: &str) -> ScopeId {
        ScopeId::new(name).expect("valid scope")
    }

    #[test]
    fn test_new_and_getters() {
        let key = ScopedKey::new(
            scope("tenant-a"),
            OperationKind::Query,
            "docs",
            &json!({"q": "rust"}),
        );
        assert_eq!(key.scope().as_str(), "tenant-a");
        assert_eq!(key.kind(), OperationKind::Query);
        assert_eq!(key.collection(), "docs");
    }

    #[test]
    fn test_different_scopes_different_keys() {
        let args = json!({"q": "rust"});
        let a = ScopedKey::new(scope("tenant-a"), OperationKind::Query, "docs", &args);
        let b = ScopedKey::new(scope("tenant-b"), OperationKind::Query, "docs", &args);
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_args_key_order_same_key() {
        let a = ScopedKey::new(
            scope("t"),
            OperationKind::Query,
            "docs",
            &json!({"q": "rust", "limit": 5}),
        );
        let b = ScopedKey::new(
            scope("t"),
            OperationKind::Query,
            "docs",
            &json!({"limit": 5, "q": "rust"}),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_args_different_keys() {
        let a = ScopedKey::new(scope("t"), OperationKind::Query, "docs", &json!({"q": "a"}));
        let b = ScopedKey::new(scope("t"), OperationKind::Query, "docs", &json!({"q": "b"}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_kinds_different_keys() {
        let args = json!({"id": 1});
        let a = ScopedKey::new(scope("t"), OperationKind::Query, "docs", &args);
        let b = ScopedKey::new(scope("t"), OperationKind::Delete, "docs", &args);
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_collections_different_keys() {
        let args = json!({"id": 1});
        let a = ScopedKey::new(scope("t"), OperationKind::Query, "docs", &args);
        let b = ScopedKey::new(scope("t"), OperationKind::Query, "notes", &args);
        assert_ne!(a, b);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: keys are equal exactly when all components are equal.
        #[test]
        fn prop_key_equality_tracks_components(
            scope_a in "[a-z]{1,8}",
            scope_b in "[a-z]{1,8}",
            coll_a in "[a-z]{1,8}",
            coll_b in "[a-z]{1,8}",
            arg_a in any::<i64>(),
            arg_b in any::<i64>(),
        ) {
            let key_a = ScopedKey::new(
                ScopeId::new(scope_a.clone()).unwrap(),
                OperationKind::Query,
                coll_a.clone(),
                &serde_json::json!({"v": arg_a}),
            );
            let key_b = ScopedKey::new(
                ScopeId::new(scope_b.clone()).unwrap(),
                OperationKind::Query,
                coll_b.clone(),
                &serde_json::json!({"v": arg_b}),
            );

            let same = scope_a == scope_b && coll_a == coll_b && arg_a == arg_b;
            prop_assert_eq!(key_a == key_b, same);
        }
    }
}
