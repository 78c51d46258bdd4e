//! Per-identity visibility scopes.
//!
//! A tenant sees rows owned by itself or by any reseller above it in the
//! ownership tree, never by siblings or descendants. A scoped operator sees the
//! hosts it is assigned plus their immediate failover and (optionally) backup
//! replication relatives. An unrestricted operator sees everything.
//!
//! # Chain bound
//!
//! The ownership walk never takes more than [`MAX_CHAIN_DEPTH`] parent hops.
//! A longer chain or a cycle is reported as an internal inconsistency, and so
//! is a parentless account other than the root. Neither is truncated silently.

use crate::control::cache::{AccessCache, CacheKey, ResourceClass};
use crate::control::identity::{AccountId, HostId, Identity, Principal};
use crate::core::error::{HostplaneError, HostplaneResult};
use crate::metadata::provider::{HostTopology, IdentityDirectory, TenantHierarchy};
use crate::ops::observability::{metrics, MetricsRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Maximum number of parent hops in an ownership chain.
pub const MAX_CHAIN_DEPTH: usize = 11;

/// Path from a tenant up through its ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnershipChain {
    /// Accounts from the tenant (first) to the terminal ancestor (last).
    accounts: Vec<AccountId>,
}

impl OwnershipChain {
    /// The tenant the chain starts at.
    pub fn tenant(&self) -> AccountId {
        self.accounts[0]
    }

    /// The last node reached: the root, or a node whose parent is missing.
    pub fn terminal(&self) -> AccountId {
        self.accounts[self.accounts.len() - 1]
    }

    /// Accounts in walk order.
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }

    /// Number of nodes in the chain.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Always false; a chain holds at least its tenant.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Check if an account is on the chain.
    pub fn contains(&self, account: AccountId) -> bool {
        self.accounts.contains(&account)
    }

    /// Visible account set.
    pub fn into_set(self) -> BTreeSet<AccountId> {
        self.accounts.into_iter().collect()
    }
}

/// Resolved set of accounts or hosts an identity may see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ids", rename_all = "kebab-case")]
pub enum AccessScope {
    /// No restriction.
    Unrestricted,
    /// Rows owned by one of these accounts.
    Accounts(BTreeSet<AccountId>),
    /// Rows placed on one of these hosts.
    Hosts(BTreeSet<HostId>),
}

impl AccessScope {
    /// Check if the scope is the unrestricted sentinel.
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    /// Check if rows owned by `account` are visible.
    pub fn allows_account(&self, account: AccountId) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Accounts(accounts) => accounts.contains(&account),
            Self::Hosts(_) => false,
        }
    }

    /// Check if rows placed on `host` are visible.
    pub fn allows_host(&self, host: HostId) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Hosts(hosts) => hosts.contains(&host),
            Self::Accounts(_) => false,
        }
    }
}

/// Per-resource-class scope computation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScopeOptions {
    /// Include backup-replication targets in a scoped operator's host set.
    #[serde(default)]
    pub include_replication: bool,
}

/// Computes and memoizes identities and access scopes.
pub struct TenantScopeResolver {
    hierarchy: Arc<dyn TenantHierarchy>,
    topology: Arc<dyn HostTopology>,
    directory: Arc<dyn IdentityDirectory>,
    identities: Arc<AccessCache<Identity>>,
    scopes: Arc<AccessCache<AccessScope>>,
    unrestricted: Arc<AccessScope>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl TenantScopeResolver {
    /// Create a new resolver over the given providers and caches.
    pub fn new(
        hierarchy: Arc<dyn TenantHierarchy>,
        topology: Arc<dyn HostTopology>,
        directory: Arc<dyn IdentityDirectory>,
        identities: Arc<AccessCache<Identity>>,
        scopes: Arc<AccessCache<AccessScope>>,
    ) -> Self {
        Self {
            hierarchy,
            topology,
            directory,
            identities,
            scopes,
            unrestricted: Arc::new(AccessScope::Unrestricted),
            metrics: None,
        }
    }

    /// Count inconsistencies in a metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shared unrestricted scope.
    pub fn unrestricted(&self) -> Arc<AccessScope> {
        Arc::clone(&self.unrestricted)
    }

    /// Identity cache.
    pub fn identity_cache(&self) -> &Arc<AccessCache<Identity>> {
        &self.identities
    }

    /// Scope cache.
    pub fn scope_cache(&self) -> &Arc<AccessCache<AccessScope>> {
        &self.scopes
    }

    /// Resolve a username to its identity, memoized.
    pub fn identity(&self, username: &str) -> HostplaneResult<Arc<Identity>> {
        let key = CacheKey::new(ResourceClass::Identity, username);
        self.identities
            .get_or_compute(&key, || self.resolve_identity(username))
    }

    /// Classify a username without consulting the cache.
    ///
    /// Unknown users and tenants whose account has vanished both resolve to
    /// [`HostplaneError::NoAccess`].
    pub fn resolve_identity(&self, username: &str) -> HostplaneResult<Identity> {
        let principal = self
            .directory
            .classify(username)?
            .ok_or(HostplaneError::NoAccess)?;

        let identity = match principal {
            Principal::Operator => Identity::Operator {
                username: username.to_string(),
            },
            Principal::ScopedOperator => Identity::ScopedOperator {
                username: username.to_string(),
                hosts: self.directory.assigned_hosts(username)?,
                permissions: self.directory.permissions(username)?,
            },
            Principal::Tenant(account) => {
                if !self.hierarchy.contains(account)? {
                    tracing::debug!(
                        username = %username,
                        account = %account,
                        "tenant account not found"
                    );
                    return Err(HostplaneError::NoAccess);
                }
                Identity::Tenant {
                    username: username.to_string(),
                    account,
                }
            }
        };
        Ok(identity)
    }

    /// Access scope of an identity, memoized.
    pub fn access_scope(
        &self,
        identity: &Identity,
        options: ScopeOptions,
    ) -> HostplaneResult<Arc<AccessScope>> {
        let key = match identity {
            Identity::Operator { .. } => return Ok(Arc::clone(&self.unrestricted)),
            Identity::Tenant { .. } => {
                CacheKey::new(ResourceClass::TenantHierarchy, identity.cache_subject())
            }
            Identity::ScopedOperator { .. } => CacheKey::new(
                ResourceClass::HostTopology,
                format!(
                    "{}:replication={}",
                    identity.cache_subject(),
                    options.include_replication
                ),
            ),
        };
        self.scopes
            .get_or_compute(&key, || self.compute_access_scope(identity, options))
    }

    /// Compute an access scope without consulting the cache.
    pub fn compute_access_scope(
        &self,
        identity: &Identity,
        options: ScopeOptions,
    ) -> HostplaneResult<AccessScope> {
        match identity {
            Identity::Operator { .. } => Ok(AccessScope::Unrestricted),
            Identity::Tenant { account, .. } => {
                let chain = self.ownership_chain(*account)?;
                Ok(AccessScope::Accounts(chain.into_set()))
            }
            Identity::ScopedOperator { hosts, .. } => {
                Ok(AccessScope::Hosts(self.expand_hosts(hosts, options)?))
            }
        }
    }

    /// Walk from `account` towards the root.
    ///
    /// A parent reference to a node that does not exist ends the chain at the
    /// current node, as if it were the root.
    pub fn ownership_chain(&self, account: AccountId) -> HostplaneResult<OwnershipChain> {
        let root = self.hierarchy.root()?;
        let mut accounts = vec![account];
        let mut visited = HashSet::from([account]);
        let mut current = account;

        while current != root {
            let Some(parent) = self.hierarchy.parent(current)? else {
                self.record_inconsistency();
                tracing::error!(
                    account = %account,
                    detached = %current,
                    root = %root,
                    "parentless account below the root"
                );
                return Err(HostplaneError::DetachedAccount {
                    account: account.0,
                    detached: current.0,
                });
            };
            if !self.hierarchy.contains(parent)? {
                tracing::warn!(
                    account = %current,
                    missing_parent = %parent,
                    "parent account missing, treating node as root"
                );
                break;
            }
            if !visited.insert(parent) {
                self.record_inconsistency();
                tracing::error!(account = %account, repeated = %parent, "ownership cycle");
                return Err(HostplaneError::OwnershipCycle { account: account.0 });
            }
            if accounts.len() > MAX_CHAIN_DEPTH {
                self.record_inconsistency();
                tracing::error!(
                    account = %account,
                    max_depth = MAX_CHAIN_DEPTH,
                    "ownership chain exceeds depth bound"
                );
                return Err(HostplaneError::ChainTooDeep {
                    account: account.0,
                    max_depth: MAX_CHAIN_DEPTH,
                });
            }
            accounts.push(parent);
            current = parent;
        }

        Ok(OwnershipChain { accounts })
    }

    /// Expand assigned hosts by one hop of failover (and optionally replication) relations.
    pub fn expand_hosts(
        &self,
        assigned: &BTreeSet<HostId>,
        options: ScopeOptions,
    ) -> HostplaneResult<BTreeSet<HostId>> {
        let mut visible = BTreeSet::new();
        for &host in assigned {
            visible.insert(host);
            if let Some(parent) = self.topology.failover_parent(host)? {
                visible.insert(parent);
            }
            visible.extend(self.topology.failover_children(host)?);
            if options.include_replication {
                visible.extend(self.topology.replication_targets(host)?);
            }
        }
        Ok(visible)
    }

    fn record_inconsistency(&self) {
        if let Some(m) = &self.metrics {
            m.counter_inc(metrics::SCOPE_INCONSISTENCIES);
        }
    }
}
