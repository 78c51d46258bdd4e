//! Caller identities and platform identifiers.
//!
//! An [`Identity`] is resolved once per connection from the authenticated
//! username and decides which visibility rules apply to every later request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a tenant account (a node in the ownership tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a managed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub u64);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requester's resolved capability class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Identity {
    /// Platform staff with unrestricted visibility.
    Operator { username: String },
    /// Platform staff restricted to an explicit set of assigned hosts.
    ScopedOperator {
        username: String,
        hosts: BTreeSet<HostId>,
        #[serde(default)]
        permissions: BTreeSet<String>,
    },
    /// Ordinary customer account.
    Tenant { username: String, account: AccountId },
}

impl Identity {
    /// Authenticated username this identity was resolved from.
    pub fn username(&self) -> &str {
        match self {
            Self::Operator { username }
            | Self::ScopedOperator { username, .. }
            | Self::Tenant { username, .. } => username,
        }
    }

    /// Check if this identity belongs to platform staff.
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Operator { .. } | Self::ScopedOperator { .. })
    }

    /// Check if the identity holds a named staff permission.
    ///
    /// Unrestricted operators hold every permission; tenants hold none.
    pub fn has_permission(&self, permission: &str) -> bool {
        match self {
            Self::Operator { .. } => true,
            Self::ScopedOperator { permissions, .. } => permissions.contains(permission),
            Self::Tenant { .. } => false,
        }
    }

    /// Stable subject string used in cache keys.
    pub fn cache_subject(&self) -> String {
        match self {
            Self::Operator { username } => format!("operator:{}", username),
            Self::ScopedOperator { username, .. } => format!("scoped:{}", username),
            Self::Tenant { account, .. } => format!("tenant:{}", account),
        }
    }
}

/// Capability class as reported by the identity directory, before host
/// assignments are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Principal {
    /// Unrestricted staff.
    Operator,
    /// Host-restricted staff.
    ScopedOperator,
    /// Customer account.
    Tenant(AccountId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_subjects_are_keyed_by_account() {
        let a = Identity::Tenant {
            username: "alice".to_string(),
            account: AccountId(7),
        };
        let b = Identity::Tenant {
            username: "alice-api".to_string(),
            account: AccountId(7),
        };
        assert_eq!(a.cache_subject(), b.cache_subject());
        assert_eq!(a.username(), "alice");
    }

    #[test]
    fn permissions_follow_capability_class() {
        let scoped = Identity::ScopedOperator {
            username: "ops-eu".to_string(),
            hosts: BTreeSet::from([HostId(1)]),
            permissions: BTreeSet::from(["billing".to_string()]),
        };
        assert!(scoped.has_permission("billing"));
        assert!(!scoped.has_permission("dns"));
        assert!(Identity::Operator {
            username: "root".to_string()
        }
        .has_permission("dns"));
        assert!(!Identity::Tenant {
            username: "t".to_string(),
            account: AccountId(1)
        }
        .is_staff());
    }
}
