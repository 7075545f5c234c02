//! Result cache with scope isolation and explicit expiry contracts.
//!
//! This module provides a bounded LRU cache for store results with
//! per-entry time-to-live and strict scope isolation.
//!
//! # Scope Isolation
//!
//! The [`ScopedKey`] type ensures that cache keys CANNOT be constructed
//! without providing a scope. Cross-scope cache access is impossible at
//! compile time - not a runtime check, but structurally enforced by the
//! type system.
//!
//! # Expiry
//!
//! An entry past its deadline is never observable: `get` removes it on
//! the spot (lazy expiry), and the scheduler's periodic `cleanup` sweep
//! removes the rest (active expiry). Both paths agree on the same
//! deadline comparison.

pub mod result_cache;
pub mod scoped_key;

pub use result_cache::{CacheConfig, CacheStats, EntryMetadata, ResultCache};
pub use scoped_key::ScopedKey;
