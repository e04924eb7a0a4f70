//! Probe Result Caching
//!
//! This module provides the cache engine that sits in front of expensive,
//! idempotent remote-system probes. A probe round-trip to a managed host
//! costs anywhere from tens of milliseconds to several seconds; answering
//! the same query from a recent result costs a map lookup.
//!
//! ## Staleness Model
//!
//! Every entry carries an absolute expiry computed at write time from a
//! per-operation TTL table: host facts rarely change (30 minutes by default)
//! while service-active state changes often (1 minute). Expiry is enforced
//! twice:
//!
//! - **Lazy**: [`ContextCache::get`] treats a present-but-expired entry as
//!   absent without mutating the store, keeping the read path on a read lock.
//! - **Eager**: a background sweeper, firing at a quarter of the default TTL,
//!   physically removes expired entries so memory is bounded even for keys
//!   nobody reads again. The sweeper stops on [`ContextCache::close`].
//!
//! ## Eviction
//!
//! The store is capacity-bounded. Under pressure, `set` evicts the entry
//! with the earliest expiry - "least future value", not least-recently-used.
//! The two diverge whenever TTLs differ by operation, which they do here; a
//! frequently read long-TTL entry always outlives a never-read short-TTL one
//! under this policy. True LRU would add a write on every read for recency
//! tracking, which this cache deliberately avoids.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::facts::Facts;

mod key;

pub use key::{op, CacheKey};

/// Floor for the sweep interval, so a short default TTL chosen for tests
/// cannot spin the sweeper.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Cache configuration: TTL policy, capacity bound, and derived sweep cadence.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied to operations absent from the per-operation table.
    pub default_ttl: Duration,
    /// Maximum number of entries held at once. Zero disables storage.
    pub max_entries: usize,
    /// Per-operation TTL table, keyed by operation name.
    pub operation_ttls: HashMap<String, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let operation_ttls = HashMap::from([
            // Host facts change rarely.
            (op::GATHER_FACTS.to_string(), Duration::from_secs(30 * 60)),
            // Installed command set drifts slowly.
            (op::CHECK_COMMAND.to_string(), Duration::from_secs(2 * 60)),
            (op::PATH_EXISTS.to_string(), Duration::from_secs(10 * 60)),
            (op::PACKAGE_INSTALLED.to_string(), Duration::from_secs(5 * 60)),
            // Service state is the most volatile probe.
            (op::SERVICE_ACTIVE.to_string(), Duration::from_secs(60)),
        ]);
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            max_entries: 1_000,
            operation_ttls,
        }
    }
}

impl CacheConfig {
    /// Configuration that stores nothing (for testing and opt-out).
    pub fn disabled() -> Self {
        Self {
            max_entries: 0,
            ..Self::default()
        }
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the capacity bound.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Override the TTL for one operation.
    pub fn with_operation_ttl(mut self, operation: impl Into<String>, ttl: Duration) -> Self {
        self.operation_ttls.insert(operation.into(), ttl);
        self
    }

    /// TTL for an operation, falling back to the default.
    pub fn ttl_for(&self, operation: &str) -> Duration {
        self.operation_ttls
            .get(operation)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Cadence of the background sweeper: a quarter of the default TTL.
    pub fn sweep_interval(&self) -> Duration {
        (self.default_ttl / 4).max(MIN_SWEEP_INTERVAL)
    }
}

/// A cached probe payload.
///
/// The decorator type-checks the stored variant against the result type it
/// expects for the operation; a mismatch is treated as a miss, never an
/// error, so stale or incompatible cache contents can only cost a
/// recomputation.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Gathered host facts.
    Facts(Facts),
    /// A boolean probe result (command available, path exists, package
    /// installed, service active).
    Flag(bool),
}

impl CacheValue {
    /// The stored facts, if this is a facts payload.
    pub fn as_facts(&self) -> Option<&Facts> {
        match self {
            CacheValue::Facts(facts) => Some(facts),
            CacheValue::Flag(_) => None,
        }
    }

    /// The stored flag, if this is a boolean payload.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            CacheValue::Flag(flag) => Some(*flag),
            CacheValue::Facts(_) => None,
        }
    }
}

/// Hit/miss/eviction counters for monitoring and diagnostics.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Reads answered from the store.
    pub hits: AtomicU64,
    /// Reads that found nothing usable (absent, expired, or mismatched).
    pub misses: AtomicU64,
    /// Entries removed under capacity pressure.
    pub evictions: AtomicU64,
    /// Entries removed by the background sweeper.
    pub expirations: AtomicU64,
    /// Entries removed by explicit invalidation or `clear`.
    pub invalidations: AtomicU64,
}

impl CacheMetrics {
    /// Record a cache hit.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Hit rate over all reads so far (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Point-in-time snapshot of cache occupancy.
///
/// `expired` counts entries physically present but past their expiry at call
/// time; taking the snapshot removes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries physically present.
    pub total: usize,
    /// Present entries past their expiry.
    pub expired: usize,
    /// Present entries still servable.
    pub active: usize,
    /// Configured capacity bound.
    pub max_size: usize,
    /// Configured default TTL, rendered human-readable.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

/// A stored record: payload, absolute expiry, and the key components needed
/// to maintain the identity index.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: CacheValue,
    expires_at: Instant,
    fingerprint: String,
    identity: String,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Primary map plus the identity index, updated together under one lock.
///
/// The index maps identity to the fingerprints of its live entries, so
/// per-identity invalidation never has to guess an identity back out of a
/// digest.
#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, CacheEntry>,
    by_identity: HashMap<String, HashSet<String>>,
}

impl Store {
    fn insert(&mut self, entry: CacheEntry) {
        self.by_identity
            .entry(entry.identity.clone())
            .or_default()
            .insert(entry.fingerprint.clone());
        self.entries.insert(entry.fingerprint.clone(), entry);
    }

    fn remove(&mut self, fingerprint: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(fingerprint)?;
        let identity_empty = match self.by_identity.get_mut(&entry.identity) {
            Some(fingerprints) => {
                fingerprints.remove(fingerprint);
                fingerprints.is_empty()
            }
            None => false,
        };
        if identity_empty {
            self.by_identity.remove(&entry.identity);
        }
        Some(entry)
    }

    fn remove_identity(&mut self, identity: &str) -> usize {
        let Some(fingerprints) = self.by_identity.remove(identity) else {
            return 0;
        };
        let mut removed = 0;
        for fingerprint in fingerprints {
            if self.entries.remove(&fingerprint).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Remove and return the entry with the earliest expiry.
    fn evict_soonest_expiring(&mut self) -> Option<CacheEntry> {
        let victim = self
            .entries
            .values()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.fingerprint.clone())?;
        self.remove(&victim)
    }

    fn sweep_expired(&mut self, now: Instant) -> usize {
        let stale: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.fingerprint.clone())
            .collect();
        let removed = stale.len();
        for fingerprint in stale {
            self.remove(&fingerprint);
        }
        removed
    }

    fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.by_identity.clear();
        removed
    }
}

/// State shared between cache handles and the sweeper task.
#[derive(Debug)]
struct CacheInner {
    store: RwLock<Store>,
    metrics: Arc<CacheMetrics>,
    config: CacheConfig,
}

impl CacheInner {
    fn sweep(&self) -> usize {
        let removed = self.store.write().sweep_expired(Instant::now());
        if removed > 0 {
            self.metrics
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }
}

/// The cache engine: a concurrent fingerprint-indexed store with
/// per-operation TTLs, a capacity bound, and a background expiry sweeper.
///
/// All operations are total and purely in-memory; none block on I/O. The
/// store is protected by a single reader/writer lock: `get` and `stats` take
/// a read lock, everything that mutates takes the write lock. The lock is
/// never held across a probe call - the decorator performs the underlying
/// probe entirely between its `get` miss and its `set`.
///
/// Must be constructed inside a Tokio runtime; construction spawns the
/// sweeper task.
#[derive(Debug)]
pub struct ContextCache {
    inner: Arc<CacheInner>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl ContextCache {
    /// Create a cache and start its background sweeper.
    pub fn new(config: CacheConfig) -> Self {
        let inner = Arc::new(CacheInner {
            store: RwLock::new(Store::default()),
            metrics: Arc::new(CacheMetrics::default()),
            config,
        });
        let shutdown = CancellationToken::new();
        spawn_sweeper(Arc::clone(&inner), shutdown.clone());
        Self {
            inner,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Look up the value stored for `key`.
    ///
    /// Returns `None` if the fingerprint is absent or the entry has expired.
    /// An expired entry is left in place for the sweeper; the read path never
    /// upgrades to a write lock.
    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let fingerprint = key.fingerprint();
        let store = self.inner.store.read();
        match store.entries.get(&fingerprint) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                self.inner.metrics.record_hit();
                trace!(key = %key, "cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                self.inner.metrics.record_miss();
                trace!(key = %key, "cache miss (expired)");
                None
            }
            None => {
                self.inner.metrics.record_miss();
                trace!(key = %key, "cache miss");
                None
            }
        }
    }

    /// Store `value` under `key` with the operation's TTL.
    ///
    /// If the store is at capacity and `key` is not already present, the
    /// entry with the earliest expiry is evicted first.
    pub fn set(&self, key: &CacheKey, value: CacheValue) {
        let config = &self.inner.config;
        if config.max_entries == 0 {
            return;
        }
        let ttl = config.ttl_for(key.operation());
        let fingerprint = key.fingerprint();
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
            identity: key.identity().to_string(),
            fingerprint: fingerprint.clone(),
        };

        let mut store = self.inner.store.write();
        if !store.entries.contains_key(&fingerprint) {
            while store.entries.len() >= config.max_entries {
                match store.evict_soonest_expiring() {
                    Some(victim) => {
                        self.inner.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            identity = %victim.identity,
                            "evicted soonest-expiring entry under capacity pressure"
                        );
                    }
                    None => break,
                }
            }
        }
        store.insert(entry);
        trace!(key = %key, ttl = ?ttl, "cached probe result");
    }

    /// Remove the entry for `key`, if present.
    pub fn invalidate(&self, key: &CacheKey) {
        let fingerprint = key.fingerprint();
        if self.inner.store.write().remove(&fingerprint).is_some() {
            self.inner
                .metrics
                .invalidations
                .fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "invalidated cache entry");
        }
    }

    /// Remove every entry scoped to `identity`. Returns the number removed.
    pub fn invalidate_identity(&self, identity: &str) -> usize {
        let removed = self.inner.store.write().remove_identity(identity);
        if removed > 0 {
            self.inner
                .metrics
                .invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(identity, removed, "invalidated cache entries for identity");
        }
        removed
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let removed = self.inner.store.write().clear();
        if removed > 0 {
            self.inner
                .metrics
                .invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "cleared cache");
        }
    }

    /// Snapshot of current occupancy. Diagnostic only; removes nothing.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let store = self.inner.store.read();
        let total = store.entries.len();
        let expired = store
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .count();
        CacheStats {
            total,
            expired,
            active: total - expired,
            max_size: self.inner.config.max_entries,
            default_ttl: self.inner.config.default_ttl,
        }
    }

    /// Hit/miss/eviction counters.
    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Number of entries physically present.
    pub fn len(&self) -> usize {
        self.inner.store.read().entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the background sweeper. Idempotent and safe to call from any
    /// task; the store stays usable afterwards, with lazy expiry on `get`
    /// still applying.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            debug!("cache closed, sweeper stopping");
        }
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for ContextCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Start the periodic expiry sweep, firing at a quarter of the default TTL
/// until the shutdown token fires.
fn spawn_sweeper(inner: Arc<CacheInner>, shutdown: CancellationToken) {
    let interval = inner.config.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = inner.sweep();
                    if removed > 0 {
                        debug!(removed, "swept expired probe results");
                    }
                }
            }
        }
        trace!("cache sweeper stopped");
    });
}
