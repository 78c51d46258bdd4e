//! Declarative per-table authorization.
//!
//! Each table declares how its rows are scoped instead of carrying a
//! hand-written query branch. The [`QueryAuthorizer`] combines that
//! declaration with a resolved [`AccessScope`] and hands the per-table query
//! layer a [`QueryScope`] to bind into its predicate.

use crate::control::identity::{AccountId, HostId, Identity};
use crate::control::scope::{AccessScope, ScopeOptions};
use crate::core::error::{HostplaneError, HostplaneResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How a table's rows are scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "kebab-case")]
pub enum TableScoping {
    /// Rows belong to an account; tenants see their ownership chain.
    OwnershipChain {
        /// Column holding the owning account.
        owner_column: String,
        /// Column holding the host the row lives on, for scoped operators.
        #[serde(default)]
        host_column: Option<String>,
    },
    /// Rows belong to a host; only staff may see them.
    HostTopology {
        /// Column holding the host.
        host_column: String,
    },
    /// Rows are visible to every authenticated identity.
    Unrestricted,
    /// Rows are visible to staff holding a named permission.
    PermissionGated {
        /// Required permission.
        permission: String,
    },
}

/// Authorization rule of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRule {
    /// Table id.
    pub table: String,
    /// Row scoping.
    #[serde(flatten)]
    pub scoping: TableScoping,
    /// Include backup-replication targets when scoping by host.
    #[serde(default)]
    pub include_replication: bool,
}

impl TableRule {
    /// Scope computation options for this table.
    pub fn scope_options(&self) -> ScopeOptions {
        ScopeOptions {
            include_replication: self.include_replication,
        }
    }
}

/// Rule set indexed by table id.
#[derive(Debug, Clone, Default)]
pub struct TableRules {
    rules: HashMap<String, TableRule>,
}

impl TableRules {
    /// Build a rule set, rejecting duplicate table ids.
    pub fn new(rules: impl IntoIterator<Item = TableRule>) -> HostplaneResult<Self> {
        let mut indexed = HashMap::new();
        for rule in rules {
            let table = rule.table.clone();
            if indexed.insert(table.clone(), rule).is_some() {
                return Err(HostplaneError::metadata(format!(
                    "duplicate authorization rule for table {}",
                    table
                )));
            }
        }
        Ok(Self { rules: indexed })
    }

    /// Rule for a table.
    pub fn get(&self, table: &str) -> Option<&TableRule> {
        self.rules.get(table)
    }

    /// Rules in table order.
    pub fn iter(&self) -> impl Iterator<Item = &TableRule> {
        let mut rules: Vec<&TableRule> = self.rules.values().collect();
        rules.sort_by(|a, b| a.table.cmp(&b.table));
        rules.into_iter()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Parameterization handed to the per-table query layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "filter", rename_all = "kebab-case")]
pub enum QueryScope {
    /// No row filter.
    All,
    /// Filter `column IN accounts`.
    AccountIn {
        column: String,
        accounts: BTreeSet<AccountId>,
    },
    /// Filter `column IN hosts`.
    HostIn {
        column: String,
        hosts: BTreeSet<HostId>,
    },
}

/// Turns resolved scopes into query parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAuthorizer;

impl QueryAuthorizer {
    /// Check whether an identity's capability class may touch the table at all.
    ///
    /// This runs before any scope is computed so that tenants never trigger
    /// topology lookups for staff-only tables.
    pub fn admits(identity: &Identity, rule: &TableRule) -> bool {
        match (&rule.scoping, identity) {
            (TableScoping::Unrestricted, _) => true,
            (_, Identity::Operator { .. }) => true,
            (TableScoping::OwnershipChain { .. }, Identity::Tenant { .. }) => true,
            (TableScoping::OwnershipChain { host_column, .. }, Identity::ScopedOperator { .. }) => {
                host_column.is_some()
            }
            (TableScoping::HostTopology { .. }, Identity::ScopedOperator { .. }) => true,
            (TableScoping::PermissionGated { permission }, identity) => {
                identity.has_permission(permission)
            }
            (TableScoping::HostTopology { .. }, Identity::Tenant { .. }) => false,
        }
    }

    /// Check if the table's rows are filtered by the caller's scope.
    ///
    /// Unrestricted and permission-gated tables never need a scope computed.
    pub fn is_scoped(rule: &TableRule) -> bool {
        matches!(
            rule.scoping,
            TableScoping::OwnershipChain { .. } | TableScoping::HostTopology { .. }
        )
    }

    /// Build the query parameterization for a resolved scope.
    ///
    /// A scope that cannot be expressed against the table's columns is
    /// reported as [`HostplaneError::NoAccess`].
    pub fn parameterize(rule: &TableRule, scope: &AccessScope) -> HostplaneResult<QueryScope> {
        match (&rule.scoping, scope) {
            (TableScoping::Unrestricted, _)
            | (TableScoping::PermissionGated { .. }, _)
            | (_, AccessScope::Unrestricted) => Ok(QueryScope::All),
            (TableScoping::OwnershipChain { owner_column, .. }, AccessScope::Accounts(ids)) => {
                Ok(QueryScope::AccountIn {
                    column: owner_column.clone(),
                    accounts: ids.clone(),
                })
            }
            (
                TableScoping::OwnershipChain {
                    host_column: Some(column),
                    ..
                },
                AccessScope::Hosts(ids),
            )
            | (TableScoping::HostTopology { host_column: column }, AccessScope::Hosts(ids)) => {
                Ok(QueryScope::HostIn {
                    column: column.clone(),
                    hosts: ids.clone(),
                })
            }
            _ => Err(HostplaneError::NoAccess),
        }
    }
}
