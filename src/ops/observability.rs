//! Metrics and health reporting.
//!
//! Metric namespaces:
//! - hostplane.cache.*
//! - hostplane.sync.*
//! - hostplane.scope.*

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall healthy state.
    pub healthy: bool,
    /// Status message.
    pub message: String,
}

impl HealthStatus {
    /// Create a healthy status.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: "OK".to_string(),
        }
    }

    /// Create an unhealthy status.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }
}

/// Metric names.
pub mod metrics {
    /// Access cache lookups served from a live entry.
    pub const CACHE_HITS: &str = "hostplane.cache.hits";
    /// Access cache lookups that recomputed.
    pub const CACHE_MISSES: &str = "hostplane.cache.misses";
    /// Access cache entries dropped by invalidation or purge.
    pub const CACHE_EVICTIONS: &str = "hostplane.cache.evictions";
    /// Invalidation events announced.
    pub const SYNC_ANNOUNCES: &str = "hostplane.sync.announces";
    /// Sync tickets issued.
    pub const SYNC_TICKETS_ISSUED: &str = "hostplane.sync.tickets_issued";
    /// Drain waits started.
    pub const SYNC_DRAIN_WAITS: &str = "hostplane.sync.drain_waits";
    /// Drain waits that hit their timeout.
    pub const SYNC_DRAIN_TIMEOUTS: &str = "hostplane.sync.drain_timeouts";
    /// Outstanding tickets across all hosts.
    pub const SYNC_OUTSTANDING_TICKETS: &str = "hostplane.sync.outstanding_tickets";
    /// Ownership-chain inconsistencies detected.
    pub const SCOPE_INCONSISTENCIES: &str = "hostplane.scope.inconsistencies";
}

/// Metrics registry for Hostplane.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Counter metrics.
    counters: RwLock<HashMap<String, AtomicU64>>,
    /// Gauge metrics.
    gauges: RwLock<HashMap<String, AtomicU64>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to a counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        let counters = self.counters.read();
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write();
        counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Get counter value.
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Increment a gauge.
    pub fn gauge_inc(&self, name: &str) {
        let gauges = self.gauges.read();
        if let Some(gauge) = gauges.get(name) {
            gauge.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement a gauge, saturating at zero.
    pub fn gauge_dec(&self, name: &str) {
        if let Some(gauge) = self.gauges.read().get(name) {
            let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
        }
    }

    /// Get gauge value.
    pub fn gauge_get(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of every counter and gauge, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        for (name, value) in self.counters.read().iter() {
            out.insert(name.clone(), value.load(Ordering::Relaxed));
        }
        for (name, value) in self.gauges.read().iter() {
            out.insert(name.clone(), value.load(Ordering::Relaxed));
        }
        out
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        for (name, value) in self.counters.read().iter() {
            let prometheus_name = name.replace('.', "_");
            output.push_str(&format!(
                "# TYPE {} counter\n{} {}\n",
                prometheus_name,
                prometheus_name,
                value.load(Ordering::Relaxed)
            ));
        }

        for (name, value) in self.gauges.read().iter() {
            let prometheus_name = name.replace('.', "_");
            output.push_str(&format!(
                "# TYPE {} gauge\n{} {}\n",
                prometheus_name,
                prometheus_name,
                value.load(Ordering::Relaxed)
            ));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let registry = MetricsRegistry::new();
        registry.counter_inc(metrics::CACHE_HITS);
        registry.counter_add(metrics::CACHE_HITS, 4);
        assert_eq!(registry.counter_get(metrics::CACHE_HITS), 5);
        assert_eq!(registry.counter_get(metrics::CACHE_MISSES), 0);
    }

    #[test]
    fn gauges_never_underflow() {
        let registry = MetricsRegistry::new();
        registry.gauge_inc(metrics::SYNC_OUTSTANDING_TICKETS);
        registry.gauge_dec(metrics::SYNC_OUTSTANDING_TICKETS);
        registry.gauge_dec(metrics::SYNC_OUTSTANDING_TICKETS);
        assert_eq!(registry.gauge_get(metrics::SYNC_OUTSTANDING_TICKETS), 0);
    }

    #[test]
    fn prometheus_export_uses_underscores() {
        let registry = MetricsRegistry::new();
        registry.counter_inc(metrics::SYNC_DRAIN_TIMEOUTS);
        let text = registry.export_prometheus();
        assert!(text.contains("hostplane_sync_drain_timeouts 1"));
    }
}
