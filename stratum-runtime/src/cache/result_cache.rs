//! Bounded LRU result cache with per-entry time-to-live.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stratum_core::{ConfigError, ScopeId, StratumResult, Timestamp, ValidationError};

use super::scoped_key::ScopedKey;
use crate::constants::{
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_MAX_TTL_SECS, DEFAULT_CACHE_TTL_SECS,
};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the result cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries across all scopes. On insert beyond
    /// this bound the least-recently-accessed entry is evicted,
    /// regardless of scope.
    pub max_entries: usize,
    /// TTL applied when the caller doesn't supply one.
    pub default_ttl: Duration,
    /// Upper bound on caller-supplied TTLs.
    pub max_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            default_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            max_ttl: Duration::from_secs(DEFAULT_CACHE_MAX_TTL_SECS),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum entry count.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the maximum accepted TTL.
    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATUM_CACHE_MAX_ENTRIES`: Maximum entry count (default: 1000)
    /// - `STRATUM_CACHE_TTL_SECS`: Default TTL in seconds (default: 3600)
    /// - `STRATUM_CACHE_MAX_TTL_SECS`: TTL ceiling in seconds (default: 604800)
    pub fn from_env() -> Self {
        let max_entries = std::env::var("STRATUM_CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);

        let default_ttl = Duration::from_secs(
            std::env::var("STRATUM_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_TTL_SECS),
        );

        let max_ttl = Duration::from_secs(
            std::env::var("STRATUM_CACHE_MAX_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_MAX_TTL_SECS),
        );

        Self {
            max_entries,
            default_ttl,
            max_ttl,
        }
    }

    /// Validate the configuration, failing fast on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_entries".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.default_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cache.default_ttl".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.default_ttl > self.max_ttl {
            return Err(ConfigError::InvalidValue {
                field: "cache.default_ttl".to_string(),
                value: format!("{}s", self.default_ttl.as_secs()),
                reason: format!("exceeds max_ttl of {}s", self.max_ttl.as_secs()),
            });
        }
        Ok(())
    }
}

// ============================================================================
// ENTRY & STATS
// ============================================================================

/// A cached value with expiry and access metadata.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    created_at: Timestamp,
    expires_at: Timestamp,
    last_accessed_at: Timestamp,
    hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }
}

/// Inspection view of one entry's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_accessed_at: Timestamp,
    pub hit_count: u64,
}

/// Counters describing cache behavior since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently resident (including not-yet-swept expired ones).
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries pushed out by the capacity bound.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    pub insertions: u64,
}

// ============================================================================
// RESULT CACHE
// ============================================================================

/// Bounded key/value cache with least-recently-used eviction and
/// per-entry time-to-live, partitioned by scope through [`ScopedKey`].
///
/// One exclusive lock guards the map; every operation is O(1) except the
/// sweep paths (`cleanup`, `invalidate_scope`, `clear`), which are
/// O(capacity). The cache performs no I/O and never initiates a store
/// call on its own - filling a miss is the caller's job.
pub struct ResultCache {
    entries: Mutex<LruCache<ScopedKey, CacheEntry>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    insertions: AtomicU64,
}

impl ResultCache {
    /// Create a cache from a validated configuration.
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        // validate() guarantees max_entries >= 1
        let capacity = NonZeroUsize::new(config.max_entries).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "cache.max_entries".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            }
        })?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
        })
    }

    /// Create a cache with default configuration.
    pub fn with_defaults() -> Self {
        // The default config is statically valid.
        Self::new(CacheConfig::default()).expect("default cache config is valid")
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a value. Expired entries count as misses and are removed
    /// on the spot, so a value past its deadline is never observable.
    pub fn get(&self, key: &ScopedKey) -> Option<serde_json::Value> {
        self.get_at(key, Utc::now())
    }

    pub(crate) fn get_at(&self, key: &ScopedKey, now: Timestamp) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock();
        let live = match entries.get_mut(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => {
                if entry.is_expired(now) {
                    None
                } else {
                    entry.last_accessed_at = now;
                    entry.hit_count += 1;
                    Some(entry.value.clone())
                }
            }
        };
        match live {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                // Lazy expiry: drop the dead entry before reporting a miss.
                entries.pop(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a value with the given TTL (the configured default when
    /// `None`). At capacity, the least-recently-accessed entry across
    /// ALL scopes is evicted first.
    ///
    /// Rejects zero TTLs and TTLs beyond the configured ceiling - a TTL
    /// that silently became "forever" or "never" would be a caller bug
    /// masked as cache behavior.
    pub fn set(
        &self,
        key: ScopedKey,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> StratumResult<()> {
        self.set_at(key, value, ttl, Utc::now())
    }

    pub(crate) fn set_at(
        &self,
        key: ScopedKey,
        value: serde_json::Value,
        ttl: Option<Duration>,
        now: Timestamp,
    ) -> StratumResult<()> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        if ttl.is_zero() {
            return Err(ValidationError::InvalidValue {
                field: "ttl".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if ttl > self.config.max_ttl {
            return Err(ValidationError::InvalidValue {
                field: "ttl".to_string(),
                reason: format!(
                    "{}s exceeds the configured ceiling of {}s",
                    ttl.as_secs(),
                    self.config.max_ttl.as_secs()
                ),
            }
            .into());
        }

        let expires_at = now
            + chrono::Duration::from_std(ttl).map_err(|_| ValidationError::InvalidValue {
                field: "ttl".to_string(),
                reason: "out of range".to_string(),
            })?;
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at,
            last_accessed_at: now,
            hit_count: 0,
        };

        let mut entries = self.entries.lock();
        let was_replacement = entries.contains(&key);
        if let Some((evicted_key, _)) = entries.push(key, entry) {
            // push returns the displaced LRU victim, or the old value
            // when the key was already present (not an eviction).
            if !was_replacement {
                tracing::debug!(
                    scope = %evicted_key.scope(),
                    collection = evicted_key.collection(),
                    "Evicted least-recently-used cache entry"
                );
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.insertions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove a single entry. Returns whether it was present.
    pub fn invalidate(&self, key: &ScopedKey) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Remove every entry belonging to a scope. Returns the count removed.
    pub fn invalidate_scope(&self, scope: &ScopeId) -> u64 {
        let mut entries = self.entries.lock();
        let doomed: Vec<ScopedKey> = entries
            .iter()
            .filter(|(key, _)| key.scope() == scope)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len() as u64
    }

    /// Remove everything. Returns the count removed.
    pub fn clear(&self) -> u64 {
        let mut entries = self.entries.lock();
        let count = entries.len() as u64;
        entries.clear();
        count
    }

    /// Active expiry sweep: remove every expired entry. O(capacity).
    /// Run periodically by the maintenance scheduler.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub(crate) fn cleanup_at(&self, now: Timestamp) -> usize {
        let mut entries = self.entries.lock();
        let doomed: Vec<ScopedKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        self.expirations
            .fetch_add(doomed.len() as u64, Ordering::Relaxed);
        doomed.len()
    }

    /// Inspect an entry's metadata without touching its LRU position
    /// or hit count. Expired entries read as absent.
    pub fn peek_metadata(&self, key: &ScopedKey) -> Option<EntryMetadata> {
        let now = Utc::now();
        let entries = self.entries.lock();
        entries.peek(key).and_then(|entry| {
            if entry.is_expired(now) {
                return None;
            }
            Some(EntryMetadata {
                created_at: entry.created_at,
                expires_at: entry.expires_at,
                last_accessed_at: entry.last_accessed_at,
                hit_count: entry.hit_count,
            })
        })
    }

    /// Current counters and occupancy.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().len(),
            max_entries: self.config.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
        }
    }

    /// Entries currently belonging to a scope (including not-yet-swept
    /// expired ones).
    pub fn scope_len(&self, scope: &ScopeId) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(key, _)| key.scope() == scope)
            .count()
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.lock().len())
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use stratum_core::OperationKind;

    fn key_for(n: i64) -> ScopedKey {
        ScopedKey::new(
            ScopeId::new("prop").unwrap(),
            OperationKind::Query,
            "docs",
            &json!({ "n": n }),
        )
    }

    proptest! {
        /// Property: occupancy never exceeds capacity, whatever the
        /// insert sequence.
        #[test]
        fn prop_never_exceeds_capacity(
            capacity in 1usize..16,
            inserts in proptest::collection::vec(0i64..32, 0..64),
        ) {
            let cache = ResultCache::new(
                CacheConfig::default().with_max_entries(capacity),
            ).unwrap();
            for n in inserts {
                cache.set(key_for(n), json!(n), None).unwrap();
                prop_assert!(cache.stats().entries <= capacity);
            }
        }

        /// Property: within capacity, get immediately after set returns
        /// the set value.
        #[test]
        fn prop_get_after_set_within_capacity(
            values in proptest::collection::vec(0i64..8, 1..8),
        ) {
            let cache = ResultCache::new(
                CacheConfig::default().with_max_entries(16),
            ).unwrap();
            for n in &values {
                cache.set(key_for(*n), json!(n), None).unwrap();
                prop_assert_eq!(cache.get(&key_for(*n)), Some(json!(n)));
            }
        }
    }
}
