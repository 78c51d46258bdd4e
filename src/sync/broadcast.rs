//! Commit-time invalidation announcements.
//!
//! Every committed mutation produces an [`InvalidationEvent`]. The broadcaster
//! maps the event's table to the resource classes derived from it, drops those
//! classes from every registered cache, and advances the sequence of each
//! affected host on the [`SyncGate`].

use crate::control::cache::{CacheInvalidation, ResourceClass};
use crate::control::identity::{AccountId, HostId};
use crate::ops::observability::{metrics, MetricsRegistry};
use crate::sync::gate::SyncGate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Table that changed.
    pub table: String,
    /// Accounts owning the changed rows.
    #[serde(default)]
    pub owner_accounts: BTreeSet<AccountId>,
    /// Hosts the changed rows live on.
    #[serde(default)]
    pub affected_hosts: BTreeSet<HostId>,
}

impl InvalidationEvent {
    /// Create an event for a table with no owners or hosts.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            owner_accounts: BTreeSet::new(),
            affected_hosts: BTreeSet::new(),
        }
    }

    /// Add owning accounts.
    pub fn with_owners(mut self, owners: impl IntoIterator<Item = AccountId>) -> Self {
        self.owner_accounts.extend(owners);
        self
    }

    /// Add affected hosts.
    pub fn with_hosts(mut self, hosts: impl IntoIterator<Item = HostId>) -> Self {
        self.affected_hosts.extend(hosts);
        self
    }
}

/// Table to resource-class dependency map.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRules {
    tables: BTreeMap<String, BTreeSet<ResourceClass>>,
}

impl InvalidationRules {
    /// Built-in dependencies of the platform's metadata tables.
    pub fn builtin() -> Self {
        use ResourceClass::*;

        let mut rules = Self::default();
        rules.add("accounts", [TenantHierarchy, Identity]);
        for table in ["users", "operators", "operator_hosts"] {
            rules.add(table, [Identity, HostTopology]);
        }
        for table in ["servers", "server_failover", "server_replication"] {
            rules.add(table, [HostTopology]);
        }
        for table in ["protocol_versions", "table_descriptors", "column_descriptors"] {
            rules.add(table, [ProtocolMetadata]);
        }
        rules
    }

    /// Built-in rules extended with extra table dependencies.
    pub fn with_extra(extra: impl IntoIterator<Item = (String, Vec<ResourceClass>)>) -> Self {
        let mut rules = Self::builtin();
        for (table, classes) in extra {
            rules.add(&table, classes);
        }
        rules
    }

    /// Add dependencies for a table.
    pub fn add(&mut self, table: &str, classes: impl IntoIterator<Item = ResourceClass>) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .extend(classes);
    }

    /// Every class a change to `table` invalidates, including its row count.
    pub fn classes_for(&self, table: &str) -> BTreeSet<ResourceClass> {
        let mut classes = self.tables.get(table).cloned().unwrap_or_default();
        classes.insert(ResourceClass::RowCount(table.to_string()));
        classes
    }
}

/// What an announcement did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnounceReceipt {
    /// Resource classes invalidated.
    pub classes: Vec<String>,
    /// Entries dropped across all caches.
    pub evicted: usize,
    /// New sequence of each affected host.
    pub host_sequences: BTreeMap<HostId, u64>,
}

/// Fans invalidation events out to caches and the sync gate.
pub struct InvalidationBroadcaster {
    rules: InvalidationRules,
    targets: RwLock<Vec<Arc<dyn CacheInvalidation>>>,
    gate: Arc<SyncGate>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl InvalidationBroadcaster {
    /// Create a broadcaster feeding `gate`.
    pub fn new(rules: InvalidationRules, gate: Arc<SyncGate>) -> Self {
        Self {
            rules,
            targets: RwLock::new(Vec::new()),
            gate,
            metrics: None,
        }
    }

    /// Count announcements in a metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a cache to be invalidated.
    pub fn register(&self, target: Arc<dyn CacheInvalidation>) {
        self.targets.write().push(target);
    }

    /// Dependency rules in use.
    pub fn rules(&self) -> &InvalidationRules {
        &self.rules
    }

    /// The gate whose host sequences this broadcaster advances.
    pub fn gate(&self) -> &Arc<SyncGate> {
        &self.gate
    }

    /// Announce a committed change.
    pub fn announce(&self, event: &InvalidationEvent) -> AnnounceReceipt {
        let classes = self.rules.classes_for(&event.table);
        let targets = self.targets.read().clone();

        let mut evicted = 0;
        for class in &classes {
            for target in &targets {
                let dropped = target.invalidate(class);
                if dropped > 0 {
                    tracing::debug!(
                        cache = target.cache_name(),
                        class = %class,
                        dropped,
                        "cache invalidated"
                    );
                }
                evicted += dropped;
            }
        }

        let host_sequences: BTreeMap<HostId, u64> = event
            .affected_hosts
            .iter()
            .map(|&host| (host, self.gate.advance(host)))
            .collect();

        if let Some(m) = &self.metrics {
            m.counter_inc(metrics::SYNC_ANNOUNCES);
        }
        tracing::info!(
            table = %event.table,
            owners = event.owner_accounts.len(),
            hosts = event.affected_hosts.len(),
            evicted,
            "invalidation announced"
        );

        AnnounceReceipt {
            classes: classes.iter().map(ToString::to_string).collect(),
            evicted,
            host_sequences,
        }
    }
}
