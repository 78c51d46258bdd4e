//! External metadata collaborators consumed by the master core.
//!
//! These traits are the seams between the authorization engine and the
//! relational store. Every call may perform blocking I/O and may fail; the
//! core never caches a failed call.

use crate::control::authorizer::QueryScope;
use crate::control::identity::{AccountId, HostId, Principal};
use crate::core::error::HostplaneResult;
use crate::protocol::version::{ProtocolVersion, TableDescriptor};
use std::collections::BTreeSet;

/// Account ownership tree.
pub trait TenantHierarchy: Send + Sync {
    /// Parent reference of `account`, or `None` for a node without a parent.
    ///
    /// The returned id may point at a node that no longer exists.
    fn parent(&self, account: AccountId) -> HostplaneResult<Option<AccountId>>;

    /// Check whether a node exists in the tree.
    fn contains(&self, account: AccountId) -> HostplaneResult<bool>;

    /// The single parentless root account.
    fn root(&self) -> HostplaneResult<AccountId>;
}

/// Host failover and replication topology.
pub trait HostTopology: Send + Sync {
    /// Host this one fails over to, if any.
    fn failover_parent(&self, host: HostId) -> HostplaneResult<Option<HostId>>;

    /// Hosts that fail over to this one.
    fn failover_children(&self, host: HostId) -> HostplaneResult<BTreeSet<HostId>>;

    /// Hosts receiving backup replication from this one.
    fn replication_targets(&self, host: HostId) -> HostplaneResult<BTreeSet<HostId>>;
}

/// Username to capability-class directory.
pub trait IdentityDirectory: Send + Sync {
    /// Classify an authenticated username, or `None` if unknown.
    fn classify(&self, username: &str) -> HostplaneResult<Option<Principal>>;

    /// Hosts assigned to a scoped operator.
    fn assigned_hosts(&self, username: &str) -> HostplaneResult<BTreeSet<HostId>>;

    /// Named staff permissions held by a scoped operator.
    fn permissions(&self, username: &str) -> HostplaneResult<BTreeSet<String>>;
}

/// Protocol version and schema descriptor registry.
pub trait VersionRegistry: Send + Sync {
    /// All known protocol versions, in any order.
    fn versions(&self) -> HostplaneResult<Vec<ProtocolVersion>>;

    /// Table descriptors in canonical enumeration order.
    fn tables(&self) -> HostplaneResult<Vec<TableDescriptor>>;
}

/// Row counts of scoped tables.
pub trait RowSource: Send + Sync {
    /// Number of rows of `table` visible under `scope`.
    fn row_count(&self, table: &str, scope: &QueryScope) -> HostplaneResult<u64>;
}
