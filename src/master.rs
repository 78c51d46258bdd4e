//! Master facade wiring the authorization engine together.
//!
//! [`Master`] owns the caches, the scope resolver, the protocol bridge, the
//! invalidation broadcaster and the sync gate. Requests arrive through a
//! [`Session`], one per client connection.

use crate::control::authorizer::{QueryAuthorizer, QueryScope, TableRule, TableRules};
use crate::control::cache::{AccessCache, CacheKey, CacheSettings, CacheStats, ResourceClass};
use crate::control::identity::{AccountId, HostId, Identity};
use crate::control::scope::{AccessScope, OwnershipChain, TenantScopeResolver};
use crate::core::config::Config;
use crate::core::error::{HostplaneError, HostplaneResult};
use crate::core::time::{Clock, SystemClock};
use crate::metadata::fixture::StaticMetadata;
use crate::metadata::provider::{
    HostTopology, IdentityDirectory, RowSource, TenantHierarchy, VersionRegistry,
};
use crate::ops::observability::{HealthStatus, MetricsRegistry};
use crate::protocol::bridge::ProtocolVersionBridge;
use crate::sync::broadcast::{
    AnnounceReceipt, InvalidationBroadcaster, InvalidationEvent, InvalidationRules,
};
use crate::sync::gate::{Connection, DrainOutcome, SyncGate, SyncTicket};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// External collaborators of a [`Master`].
#[derive(Clone)]
pub struct Providers {
    /// Account ownership tree.
    pub hierarchy: Arc<dyn TenantHierarchy>,
    /// Host topology.
    pub topology: Arc<dyn HostTopology>,
    /// Username directory.
    pub directory: Arc<dyn IdentityDirectory>,
    /// Protocol version registry.
    pub versions: Arc<dyn VersionRegistry>,
    /// Row counts.
    pub rows: Arc<dyn RowSource>,
    /// Per-table authorization rules.
    pub table_rules: TableRules,
}

impl Providers {
    /// Use one static snapshot for every collaborator.
    pub fn from_static(metadata: Arc<StaticMetadata>) -> Self {
        Self {
            table_rules: metadata.table_rules().clone(),
            hierarchy: metadata.clone(),
            topology: metadata.clone(),
            directory: metadata.clone(),
            versions: metadata.clone(),
            rows: metadata,
        }
    }
}

/// Control-plane master core.
pub struct Master {
    resolver: TenantScopeResolver,
    rules: TableRules,
    rows: Arc<dyn RowSource>,
    row_counts: Arc<AccessCache<u64>>,
    bridge: Arc<ProtocolVersionBridge>,
    broadcaster: InvalidationBroadcaster,
    gate: Arc<SyncGate>,
    hierarchy: Arc<dyn TenantHierarchy>,
    metrics: Arc<MetricsRegistry>,
}

impl Master {
    /// Build a master on the system clock.
    pub fn new(config: &Config, providers: Providers) -> Result<Self> {
        Self::with_clock(config, providers, Arc::new(SystemClock))
    }

    /// Build a master on an explicit clock.
    pub fn with_clock(config: &Config, providers: Providers, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let metrics = Arc::new(MetricsRegistry::new());
        let settings = CacheSettings::from(&config.cache);
        let identities = Arc::new(new_cache("identities", settings, &clock, &metrics));
        let scopes = Arc::new(new_cache("scopes", settings, &clock, &metrics));
        let row_counts = Arc::new(new_cache("row-counts", settings, &clock, &metrics));

        let resolver = TenantScopeResolver::new(
            Arc::clone(&providers.hierarchy),
            providers.topology,
            providers.directory,
            Arc::clone(&identities),
            Arc::clone(&scopes),
        )
        .with_metrics(Arc::clone(&metrics));

        let gate = Arc::new(
            SyncGate::new(config.sync.drain_timeout()).with_metrics(Arc::clone(&metrics)),
        );
        let rules = InvalidationRules::with_extra(config.invalidation_rules()?);
        let broadcaster = InvalidationBroadcaster::new(rules, Arc::clone(&gate))
            .with_metrics(Arc::clone(&metrics));
        let bridge = Arc::new(ProtocolVersionBridge::new(providers.versions));

        broadcaster.register(identities);
        broadcaster.register(scopes);
        broadcaster.register(row_counts.clone());
        broadcaster.register(bridge.clone());

        tracing::info!(
            ttl_secs = settings.ttl.as_secs(),
            drain_timeout_secs = config.sync.drain_timeout_seconds,
            table_rules = providers.table_rules.len(),
            "master initialized"
        );

        Ok(Self {
            resolver,
            rules: providers.table_rules,
            rows: providers.rows,
            row_counts,
            bridge,
            broadcaster,
            gate,
            hierarchy: providers.hierarchy,
            metrics,
        })
    }

    /// Open a session for an authenticated user on a negotiated protocol version.
    pub fn open_session(
        self: &Arc<Self>,
        username: impl Into<String>,
        protocol_version: impl Into<String>,
    ) -> Session {
        Session {
            master: Arc::clone(self),
            connection: self.gate.open_connection(),
            username: username.into(),
            protocol_version: protocol_version.into(),
        }
    }

    // ========================================================================
    // Authorization
    // ========================================================================

    /// Resolve a username to its cached identity.
    pub fn resolve_identity(&self, username: &str) -> HostplaneResult<Arc<Identity>> {
        self.resolver.identity(username)
    }

    /// Resolve the scope an identity has on a table.
    ///
    /// Unknown tables and tables the identity's class may not touch are
    /// reported as [`HostplaneError::NoAccess`].
    pub fn authorize(&self, identity: &Identity, table: &str) -> HostplaneResult<Arc<AccessScope>> {
        let rule = self.admitted_rule(identity, table)?;
        if !QueryAuthorizer::is_scoped(rule) {
            return Ok(self.resolver.unrestricted());
        }
        self.resolver.access_scope(identity, rule.scope_options())
    }

    /// Resolve the query parameterization for an identity on a table.
    pub fn scoped_query(&self, identity: &Identity, table: &str) -> HostplaneResult<QueryScope> {
        let scope = self.authorize(identity, table)?;
        let rule = self.admitted_rule(identity, table)?;
        QueryAuthorizer::parameterize(rule, &scope)
    }

    /// Number of rows of `table` visible to `identity`, memoized.
    pub fn row_count(&self, identity: &Identity, table: &str) -> HostplaneResult<u64> {
        let query = self.scoped_query(identity, table)?;
        // Keyed by the filter itself so identities with the same scope share a count.
        let subject = serde_json::to_string(&query)
            .map_err(|e| HostplaneError::internal(format!("unencodable query scope: {}", e)))?;
        let key = CacheKey::new(ResourceClass::RowCount(table.to_string()), subject);
        let count = self
            .row_counts
            .get_or_compute(&key, || self.rows.row_count(table, &query))?;
        Ok(*count)
    }

    /// Ownership chain of an account.
    pub fn ownership_chain(&self, account: AccountId) -> HostplaneResult<OwnershipChain> {
        self.resolver.ownership_chain(account)
    }

    /// Per-table authorization rules.
    pub fn table_rules(&self) -> &TableRules {
        &self.rules
    }

    fn admitted_rule(&self, identity: &Identity, table: &str) -> HostplaneResult<&TableRule> {
        let rule = self.rules.get(table).ok_or(HostplaneError::NoAccess)?;
        if !QueryAuthorizer::admits(identity, rule) {
            tracing::debug!(
                username = %identity.username(),
                table = %table,
                "table not admitted for identity"
            );
            return Err(HostplaneError::NoAccess);
        }
        Ok(rule)
    }

    // ========================================================================
    // Invalidation and sync
    // ========================================================================

    /// Announce a committed change.
    pub fn announce(&self, event: &InvalidationEvent) -> AnnounceReceipt {
        self.broadcaster.announce(event)
    }

    /// Issue a sync ticket for `host` owned by `connection`.
    pub fn begin_wait(&self, host: HostId, connection: &Arc<Connection>) -> SyncTicket {
        self.gate.begin_wait(host, connection)
    }

    /// Mark a sync ticket observed.
    pub fn complete(&self, ticket: &SyncTicket) -> bool {
        self.gate.complete(ticket)
    }

    /// Wait for a host's outstanding tickets, bounded by `timeout`.
    pub fn await_drain(&self, host: HostId, timeout: Duration) -> DrainOutcome {
        self.gate.await_drain(host, timeout)
    }

    /// Wait for a host's outstanding tickets with the configured timeout.
    pub fn await_drain_default(&self, host: HostId) -> DrainOutcome {
        self.gate.await_drain_default(host)
    }

    /// Sync gate.
    pub fn gate(&self) -> &Arc<SyncGate> {
        &self.gate
    }

    // ========================================================================
    // Protocol bridge
    // ========================================================================

    /// Canonical table id at a client ordinal, or -1.
    pub fn client_ordinal_to_canonical(&self, version: &str, ordinal: i32) -> HostplaneResult<i32> {
        self.bridge.client_ordinal_to_canonical(version, ordinal)
    }

    /// Client ordinal of a canonical table id, or -1.
    pub fn canonical_to_client_ordinal(&self, version: &str, canonical: i32) -> HostplaneResult<i32> {
        self.bridge.canonical_to_client_ordinal(version, canonical)
    }

    /// Canonical column id at a client column ordinal, or -1.
    pub fn client_column_to_canonical(
        &self,
        version: &str,
        canonical_table: i32,
        ordinal: i32,
    ) -> HostplaneResult<i32> {
        self.bridge
            .client_column_to_canonical(version, canonical_table, ordinal)
    }

    /// Client column ordinal of a canonical column id, or -1.
    pub fn canonical_to_client_column(
        &self,
        version: &str,
        canonical_table: i32,
        canonical_column: i32,
    ) -> HostplaneResult<i32> {
        self.bridge
            .canonical_to_client_column(version, canonical_table, canonical_column)
    }

    /// Canonical table id at a client ordinal, or a protocol mismatch.
    pub fn require_table(&self, version: &str, ordinal: i32) -> HostplaneResult<i32> {
        self.bridge.require_table(version, ordinal)
    }

    /// Canonical column id at a client column ordinal, or a protocol mismatch.
    pub fn require_column(
        &self,
        version: &str,
        canonical_table: i32,
        ordinal: i32,
    ) -> HostplaneResult<i32> {
        self.bridge.require_column(version, canonical_table, ordinal)
    }

    /// Protocol bridge.
    pub fn bridge(&self) -> &Arc<ProtocolVersionBridge> {
        &self.bridge
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop expired entries from every cache.
    pub fn purge_expired(&self) -> usize {
        self.resolver.identity_cache().purge_expired()
            + self.resolver.scope_cache().purge_expired()
            + self.row_counts.purge_expired()
    }

    /// Statistics of every cache, by cache name.
    pub fn cache_stats(&self) -> Vec<(String, CacheStats)> {
        vec![
            (
                self.resolver.identity_cache().name().to_string(),
                self.resolver.identity_cache().stats(),
            ),
            (
                self.resolver.scope_cache().name().to_string(),
                self.resolver.scope_cache().stats(),
            ),
            (self.row_counts.name().to_string(), self.row_counts.stats()),
        ]
    }

    /// Metrics registry.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Probe the metadata store.
    pub fn health(&self) -> HealthStatus {
        match self.hierarchy.root() {
            Ok(_) => HealthStatus::healthy(),
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }
}

fn new_cache<V>(
    name: &str,
    settings: CacheSettings,
    clock: &Arc<dyn Clock>,
    metrics: &Arc<MetricsRegistry>,
) -> AccessCache<V> {
    AccessCache::new(name, settings, Arc::clone(clock)).with_metrics(Arc::clone(metrics))
}

/// Per-connection handle.
///
/// Dropping a session closes its connection, releasing any sync tickets it
/// still holds.
pub struct Session {
    master: Arc<Master>,
    connection: Arc<Connection>,
    username: String,
    protocol_version: String,
}

impl Session {
    /// Authenticated username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Negotiated protocol version.
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Underlying gate connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The session's identity, resolved on first use and cached.
    pub fn identity(&self) -> HostplaneResult<Arc<Identity>> {
        self.master.resolve_identity(&self.username)
    }

    /// Scope on a table.
    pub fn authorize(&self, table: &str) -> HostplaneResult<Arc<AccessScope>> {
        let identity = self.identity()?;
        self.master.authorize(&identity, table)
    }

    /// Query parameterization for a table.
    pub fn scoped_query(&self, table: &str) -> HostplaneResult<QueryScope> {
        let identity = self.identity()?;
        self.master.scoped_query(&identity, table)
    }

    /// Query parameterization for the table at a client ordinal.
    ///
    /// Returns the table name along with its parameterization.
    pub fn scoped_query_at(&self, ordinal: i32) -> HostplaneResult<(String, QueryScope)> {
        let canonical = self.master.require_table(&self.protocol_version, ordinal)?;
        let table = self
            .master
            .bridge
            .table_name(canonical)?
            .ok_or_else(|| HostplaneError::internal(format!("table {} has no name", canonical)))?;
        let query = self.scoped_query(&table)?;
        Ok((table, query))
    }

    /// Visible row count of a table.
    pub fn row_count(&self, table: &str) -> HostplaneResult<u64> {
        let identity = self.identity()?;
        self.master.row_count(&identity, table)
    }

    /// Issue a sync ticket for `host` owned by this session.
    pub fn begin_wait(&self, host: HostId) -> SyncTicket {
        self.master.begin_wait(host, &self.connection)
    }

    /// Close the session's connection.
    pub fn close(&self) {
        self.master.gate.close_connection(&self.connection);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
