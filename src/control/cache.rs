//! TTL cache of derived authorization and lookup data.
//!
//! Every entry is tagged with a [`ResourceClass`] and is dropped wholesale when
//! a committed change touches a table that class depends on. Entries are
//! immutable: a recomputation replaces the entry, it never edits it, so readers
//! need no lock beyond the per-key slot.
//!
//! # Concurrency
//!
//! The class/subject map is only locked long enough to find or create a slot.
//! The recomputation itself runs while holding that key's slot lock, so two
//! callers asking for the same key compute once while callers for unrelated
//! keys proceed independently.
//!
//! # Clock jumps
//!
//! An entry whose expiry lies further in the future than the configured max
//! age can only have been written before the wall clock moved backwards. Such
//! entries are treated as expired.

use crate::core::config::CacheConfig;
use crate::core::error::HostplaneError;
use crate::core::time::{Clock, Tick};
use crate::ops::observability::{metrics, MetricsRegistry};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Explicit invalidation tag for cached data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceClass {
    /// Username to identity resolution.
    Identity,
    /// Account ownership tree.
    TenantHierarchy,
    /// Host failover/replication topology and operator host assignments.
    HostTopology,
    /// Protocol versions and table/column descriptors.
    ProtocolMetadata,
    /// Row count of one table.
    RowCount(String),
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::TenantHierarchy => write!(f, "tenant-hierarchy"),
            Self::HostTopology => write!(f, "host-topology"),
            Self::ProtocolMetadata => write!(f, "protocol-metadata"),
            Self::RowCount(table) => write!(f, "row-count:{}", table),
        }
    }
}

impl FromStr for ResourceClass {
    type Err = HostplaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(Self::Identity),
            "tenant-hierarchy" => Ok(Self::TenantHierarchy),
            "host-topology" => Ok(Self::HostTopology),
            "protocol-metadata" => Ok(Self::ProtocolMetadata),
            other => match other.strip_prefix("row-count:") {
                Some(table) if !table.is_empty() => Ok(Self::RowCount(table.to_string())),
                _ => Err(HostplaneError::invalid_request(format!(
                    "unknown resource class: {}",
                    other
                ))),
            },
        }
    }
}

/// Key of a cached entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Invalidation tag.
    pub class: ResourceClass,
    /// Identity or resource the value was derived for.
    pub subject: String,
}

impl CacheKey {
    /// Create a new cache key.
    pub fn new(class: ResourceClass, subject: impl Into<String>) -> Self {
        Self {
            class,
            subject: subject.into(),
        }
    }
}

/// An immutable cached value with its absolute expiry.
#[derive(Debug)]
pub struct CacheEntry<V> {
    value: Arc<V>,
    stored_at: Tick,
    expires_at: Tick,
}

impl<V> CacheEntry<V> {
    fn new(value: Arc<V>, now: Tick, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: now,
            expires_at: now.add(ttl),
        }
    }

    /// The cached value.
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// When the entry was stored.
    pub fn stored_at(&self) -> Tick {
        self.stored_at
    }

    /// Absolute expiry.
    pub fn expires_at(&self) -> Tick {
        self.expires_at
    }

    /// Check if the entry may be served at `now`.
    ///
    /// The expiry must be in the future and no further away than `max_age`.
    pub fn is_live(&self, now: Tick, max_age: Duration) -> bool {
        if !now.is_before(self.expires_at) {
            return false;
        }
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        now.ms_until(self.expires_at) <= max_age_ms
    }
}

/// Per-key critical section.
struct Slot<V> {
    entry: Mutex<Option<Arc<CacheEntry<V>>>>,
    /// Set once the slot has been detached from the map by an invalidation.
    retired: AtomicBool,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            entry: Mutex::new(None),
            retired: AtomicBool::new(false),
        }
    }
}

/// Expiry settings for an [`AccessCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// Lifetime of a newly stored entry.
    pub ttl: Duration,
    /// Largest plausible remaining lifetime.
    pub max_age: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_age: Duration::from_secs(3600),
        }
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            max_age: config.max_age(),
        }
    }
}

/// Something holding data that a resource-class invalidation must drop.
pub trait CacheInvalidation: Send + Sync {
    /// Name used in logs.
    fn cache_name(&self) -> &str;

    /// Drop everything tagged with `class`, returning the number of entries dropped.
    fn invalidate(&self, class: &ResourceClass) -> usize;
}

type SlotMap<V> = HashMap<ResourceClass, HashMap<String, Arc<Slot<V>>>>;

/// Generic TTL cache of derived values.
pub struct AccessCache<V> {
    name: String,
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    slots: RwLock<SlotMap<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl<V> AccessCache<V> {
    /// Create a new cache.
    pub fn new(name: impl Into<String>, settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            settings,
            clock,
            slots: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Report hits, misses and evictions to a metrics registry as well.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expiry settings.
    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// Return the live cached value for `key`, or compute and store it.
    ///
    /// A failed computation stores nothing and its error is returned as is.
    pub fn get_or_compute<F, E>(&self, key: &CacheKey, compute: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        loop {
            let slot = self.slot(key);
            let mut guard = slot.entry.lock();

            // An invalidation detached this slot while we queued for it.
            if slot.retired.load(Ordering::Acquire) {
                continue;
            }

            let now = self.clock.now();
            if let Some(entry) = guard.as_ref() {
                if entry.is_live(now, self.settings.max_age) {
                    self.record_hit();
                    return Ok(Arc::clone(&entry.value));
                }
            }

            self.record_miss();
            tracing::debug!(
                cache = %self.name,
                class = %key.class,
                subject = %key.subject,
                "cache miss, recomputing"
            );

            let value = Arc::new(compute()?);
            let stored_at = self.clock.now();
            *guard = Some(Arc::new(CacheEntry::new(
                Arc::clone(&value),
                stored_at,
                self.settings.ttl,
            )));
            return Ok(value);
        }
    }

    /// Return the live cached value for `key` without computing.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<V>> {
        let slot = {
            let slots = self.slots.read();
            slots.get(&key.class)?.get(&key.subject).cloned()?
        };
        let guard = slot.entry.lock();
        let now = self.clock.now();
        guard
            .as_ref()
            .filter(|entry| entry.is_live(now, self.settings.max_age))
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Drop every entry tagged with `class`.
    pub fn invalidate_class(&self, class: &ResourceClass) -> usize {
        let removed = self.slots.write().remove(class);
        let Some(removed) = removed else {
            return 0;
        };
        let mut dropped = 0;
        for slot in removed.values() {
            slot.retired.store(true, Ordering::Release);
            if slot.entry.lock().take().is_some() {
                dropped += 1;
            }
        }
        self.record_evictions(dropped);
        dropped
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) -> usize {
        let removed = std::mem::take(&mut *self.slots.write());
        let mut dropped = 0;
        for slot in removed.values().flat_map(|subjects| subjects.values()) {
            slot.retired.store(true, Ordering::Release);
            if slot.entry.lock().take().is_some() {
                dropped += 1;
            }
        }
        self.record_evictions(dropped);
        dropped
    }

    /// Drop entries that can no longer be served.
    ///
    /// Slots currently being recomputed are skipped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let max_age = self.settings.max_age;
        let mut dropped = 0;
        let mut slots = self.slots.write();
        for subjects in slots.values_mut() {
            subjects.retain(|_, slot| {
                let Some(guard) = slot.entry.try_lock() else {
                    return true;
                };
                let keep = match guard.as_ref() {
                    Some(entry) => entry.is_live(now, max_age),
                    None => false,
                };
                if !keep {
                    slot.retired.store(true, Ordering::Release);
                    if guard.is_some() {
                        dropped += 1;
                    }
                }
                keep
            });
        }
        slots.retain(|_, subjects| !subjects.is_empty());
        drop(slots);
        self.record_evictions(dropped);
        dropped
    }

    /// Number of stored entries, live or not.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .flat_map(|subjects| subjects.values())
            .filter(|slot| slot.entry.try_lock().map_or(true, |g| g.is_some()))
            .count()
    }

    /// Check if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.read();
        let mut entries_by_class = HashMap::new();
        for (class, subjects) in slots.iter() {
            entries_by_class.insert(class.to_string(), subjects.len());
        }
        CacheStats {
            entries: entries_by_class.values().sum(),
            entries_by_class,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, key: &CacheKey) -> Arc<Slot<V>> {
        if let Some(slot) = self
            .slots
            .read()
            .get(&key.class)
            .and_then(|subjects| subjects.get(&key.subject))
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write();
        Arc::clone(
            slots
                .entry(key.class.clone())
                .or_default()
                .entry(key.subject.clone())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.counter_inc(metrics::CACHE_HITS);
        }
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.counter_inc(metrics::CACHE_MISSES);
        }
    }

    fn record_evictions(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.counter_add(metrics::CACHE_EVICTIONS, count as u64);
        }
    }
}

impl<V: Send + Sync> CacheInvalidation for AccessCache<V> {
    fn cache_name(&self) -> &str {
        &self.name
    }

    fn invalidate(&self, class: &ResourceClass) -> usize {
        self.invalidate_class(class)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of slots currently held.
    pub entries: usize,
    /// Slot count per resource class tag.
    pub entries_by_class: HashMap<String, usize>,
    /// Lookups served from a live entry.
    pub hits: u64,
    /// Lookups that recomputed.
    pub misses: u64,
    /// Entries dropped by invalidation or purge.
    pub evictions: u64,
}
