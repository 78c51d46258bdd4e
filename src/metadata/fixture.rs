//! TOML-backed metadata snapshot.
//!
//! [`StaticMetadata`] implements every provider trait over an in-memory
//! document. It backs the CLI and the integration tests, and its mutators let
//! a caller change the snapshot and then announce the change like a real
//! commit would.
//!
//! ```toml
//! root = 1
//!
//! [[accounts]]
//! id = 1
//!
//! [[accounts]]
//! id = 2
//! parent = 1
//!
//! [[hosts]]
//! id = 10
//! failover_parent = 11
//!
//! [[users]]
//! username = "carol"
//! role = "tenant"
//! account = 2
//! ```

use crate::control::authorizer::{QueryScope, TableRule, TableRules};
use crate::control::identity::{AccountId, HostId, Principal};
use crate::core::error::{HostplaneError, HostplaneResult};
use crate::metadata::provider::{
    HostTopology, IdentityDirectory, RowSource, TenantHierarchy, VersionRegistry,
};
use crate::protocol::version::{ProtocolVersion, ReleaseIndex, TableDescriptor, Validity};
use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Account node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Account id.
    pub id: AccountId,
    /// Parent reference; may dangle.
    #[serde(default)]
    pub parent: Option<AccountId>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Managed host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Host id.
    pub id: HostId,
    /// Host this one fails over to.
    #[serde(default)]
    pub failover_parent: Option<HostId>,
    /// Backup replication targets.
    #[serde(default)]
    pub replication_targets: BTreeSet<HostId>,
}

/// Capability class of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "kebab-case")]
pub enum UserRole {
    /// Unrestricted staff.
    Operator,
    /// Staff limited to assigned hosts.
    ScopedOperator {
        #[serde(default)]
        hosts: BTreeSet<HostId>,
        #[serde(default)]
        permissions: BTreeSet<String>,
    },
    /// Customer of an account.
    Tenant { account: AccountId },
}

/// Authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Login name.
    pub username: String,
    /// Capability class.
    #[serde(flatten)]
    pub role: UserRole,
}

/// A row of a scoped table, reduced to its ownership and placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecord {
    /// Table the row belongs to.
    pub table: String,
    /// Owning account.
    #[serde(default)]
    pub account: Option<AccountId>,
    /// Host the row lives on.
    #[serde(default)]
    pub host: Option<HostId>,
}

impl RowRecord {
    fn visible(&self, scope: &QueryScope) -> bool {
        match scope {
            QueryScope::All => true,
            QueryScope::AccountIn { accounts, .. } => {
                self.account.is_some_and(|a| accounts.contains(&a))
            }
            QueryScope::HostIn { hosts, .. } => self.host.is_some_and(|h| hosts.contains(&h)),
        }
    }
}

/// On-disk metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataDocument {
    /// Root account id.
    pub root: AccountId,
    /// Ownership tree nodes.
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
    /// Hosts.
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    /// Users.
    #[serde(default)]
    pub users: Vec<UserRecord>,
    /// Protocol versions.
    #[serde(default)]
    pub protocol_versions: Vec<ProtocolVersion>,
    /// Table descriptors in canonical order.
    #[serde(default)]
    pub tables: Vec<TableDescriptor>,
    /// Per-table authorization rules.
    #[serde(default)]
    pub table_rules: Vec<TableRule>,
    /// Rows of scoped tables.
    #[serde(default)]
    pub rows: Vec<RowRecord>,
}

impl MetadataDocument {
    /// Check referential integrity.
    pub fn validate(&self) -> Result<()> {
        let mut accounts = HashSet::new();
        for account in &self.accounts {
            if !accounts.insert(account.id) {
                bail!("duplicate account id {}", account.id);
            }
        }
        let Some(root) = self.accounts.iter().find(|a| a.id == self.root) else {
            bail!("root account {} is not defined", self.root);
        };
        if root.parent.is_some() {
            bail!("root account {} must not have a parent", self.root);
        }
        if let Some(orphan) = self
            .accounts
            .iter()
            .find(|a| a.id != self.root && a.parent.is_none())
        {
            bail!("account {} has no parent but is not the root", orphan.id);
        }

        let mut hosts = HashSet::new();
        for host in &self.hosts {
            if !hosts.insert(host.id) {
                bail!("duplicate host id {}", host.id);
            }
        }
        for host in &self.hosts {
            let related = host.failover_parent.iter().chain(&host.replication_targets);
            for other in related {
                if !hosts.contains(other) {
                    bail!("host {} references unknown host {}", host.id, other);
                }
            }
        }

        let mut users = HashSet::new();
        for user in &self.users {
            if !users.insert(user.username.as_str()) {
                bail!("duplicate user {}", user.username);
            }
        }

        let index = ReleaseIndex::new(&self.protocol_versions)?;
        let check = |what: &str, validity: &Validity| -> Result<()> {
            for token in std::iter::once(&validity.since).chain(&validity.last) {
                if index.released_ms(token).is_none() {
                    bail!("{} references unknown protocol version {}", what, token);
                }
            }
            Ok(())
        };
        let mut table_ids = HashSet::new();
        for table in &self.tables {
            if !table_ids.insert(table.id) {
                bail!("duplicate table id {}", table.id);
            }
            check(&format!("table {}", table.name), &table.validity)?;
            let mut column_ids = HashSet::new();
            for column in &table.columns {
                if !column_ids.insert(column.id) {
                    bail!("duplicate column id {} in table {}", column.id, table.name);
                }
                check(
                    &format!("column {}.{}", table.name, column.name),
                    &column.validity,
                )?;
            }
        }

        TableRules::new(self.table_rules.iter().cloned())?;
        Ok(())
    }
}

struct Snapshot {
    root: AccountId,
    accounts: BTreeMap<AccountId, Option<AccountId>>,
    hosts: BTreeMap<HostId, HostRecord>,
    users: BTreeMap<String, UserRole>,
    versions: Vec<ProtocolVersion>,
    tables: Vec<TableDescriptor>,
    rows: Vec<RowRecord>,
}

impl From<MetadataDocument> for Snapshot {
    fn from(doc: MetadataDocument) -> Self {
        Self {
            root: doc.root,
            accounts: doc.accounts.into_iter().map(|a| (a.id, a.parent)).collect(),
            hosts: doc.hosts.into_iter().map(|h| (h.id, h)).collect(),
            users: doc
                .users
                .into_iter()
                .map(|u| (u.username, u.role))
                .collect(),
            versions: doc.protocol_versions,
            tables: doc.tables,
            rows: doc.rows,
        }
    }
}

/// In-memory metadata store implementing every provider trait.
pub struct StaticMetadata {
    snapshot: RwLock<Snapshot>,
    rules: TableRules,
    unavailable: AtomicBool,
}

impl StaticMetadata {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read metadata file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("invalid metadata file: {}", path.display()))
    }

    /// Parse from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let doc: MetadataDocument =
            toml::from_str(content).context("failed to parse metadata TOML")?;
        Self::from_document(doc)
    }

    /// Build from a parsed document.
    pub fn from_document(doc: MetadataDocument) -> Result<Self> {
        doc.validate()?;
        let rules = TableRules::new(doc.table_rules.iter().cloned())?;
        Ok(Self {
            snapshot: RwLock::new(Snapshot::from(doc)),
            rules,
            unavailable: AtomicBool::new(false),
        })
    }

    /// Per-table authorization rules.
    pub fn table_rules(&self) -> &TableRules {
        &self.rules
    }

    /// Make every provider call fail, simulating a store outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert or re-parent an account.
    pub fn upsert_account(&self, id: AccountId, parent: Option<AccountId>) {
        self.snapshot.write().accounts.insert(id, parent);
    }

    /// Remove an account, leaving any child references dangling.
    pub fn remove_account(&self, id: AccountId) -> bool {
        self.snapshot.write().accounts.remove(&id).is_some()
    }

    /// Insert or replace a host.
    pub fn upsert_host(&self, host: HostRecord) {
        self.snapshot.write().hosts.insert(host.id, host);
    }

    /// Insert or replace a user.
    pub fn upsert_user(&self, username: impl Into<String>, role: UserRole) {
        self.snapshot.write().users.insert(username.into(), role);
    }

    /// Remove a user.
    pub fn remove_user(&self, username: &str) -> bool {
        self.snapshot.write().users.remove(username).is_some()
    }

    /// Insert a table descriptor at a canonical position.
    pub fn insert_table(&self, position: usize, table: TableDescriptor) {
        let mut snapshot = self.snapshot.write();
        let position = position.min(snapshot.tables.len());
        snapshot.tables.insert(position, table);
    }

    /// Append a protocol version.
    pub fn add_version(&self, version: ProtocolVersion) {
        self.snapshot.write().versions.push(version);
    }

    /// Append a row.
    pub fn add_row(&self, row: RowRecord) {
        self.snapshot.write().rows.push(row);
    }

    fn read(&self) -> HostplaneResult<parking_lot::RwLockReadGuard<'_, Snapshot>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HostplaneError::metadata("metadata store unavailable"));
        }
        Ok(self.snapshot.read())
    }
}

impl TenantHierarchy for StaticMetadata {
    fn parent(&self, account: AccountId) -> HostplaneResult<Option<AccountId>> {
        Ok(self.read()?.accounts.get(&account).copied().flatten())
    }

    fn contains(&self, account: AccountId) -> HostplaneResult<bool> {
        Ok(self.read()?.accounts.contains_key(&account))
    }

    fn root(&self) -> HostplaneResult<AccountId> {
        Ok(self.read()?.root)
    }
}

impl HostTopology for StaticMetadata {
    fn failover_parent(&self, host: HostId) -> HostplaneResult<Option<HostId>> {
        Ok(self
            .read()?
            .hosts
            .get(&host)
            .and_then(|h| h.failover_parent))
    }

    fn failover_children(&self, host: HostId) -> HostplaneResult<BTreeSet<HostId>> {
        Ok(self
            .read()?
            .hosts
            .values()
            .filter(|h| h.failover_parent == Some(host))
            .map(|h| h.id)
            .collect())
    }

    fn replication_targets(&self, host: HostId) -> HostplaneResult<BTreeSet<HostId>> {
        Ok(self
            .read()?
            .hosts
            .get(&host)
            .map(|h| h.replication_targets.clone())
            .unwrap_or_default())
    }
}

impl IdentityDirectory for StaticMetadata {
    fn classify(&self, username: &str) -> HostplaneResult<Option<Principal>> {
        Ok(self.read()?.users.get(username).map(|role| match role {
            UserRole::Operator => Principal::Operator,
            UserRole::ScopedOperator { .. } => Principal::ScopedOperator,
            UserRole::Tenant { account } => Principal::Tenant(*account),
        }))
    }

    fn assigned_hosts(&self, username: &str) -> HostplaneResult<BTreeSet<HostId>> {
        Ok(match self.read()?.users.get(username) {
            Some(UserRole::ScopedOperator { hosts, .. }) => hosts.clone(),
            _ => BTreeSet::new(),
        })
    }

    fn permissions(&self, username: &str) -> HostplaneResult<BTreeSet<String>> {
        Ok(match self.read()?.users.get(username) {
            Some(UserRole::ScopedOperator { permissions, .. }) => permissions.clone(),
            _ => BTreeSet::new(),
        })
    }
}

impl VersionRegistry for StaticMetadata {
    fn versions(&self) -> HostplaneResult<Vec<ProtocolVersion>> {
        Ok(self.read()?.versions.clone())
    }

    fn tables(&self) -> HostplaneResult<Vec<TableDescriptor>> {
        Ok(self.read()?.tables.clone())
    }
}

impl RowSource for StaticMetadata {
    fn row_count(&self, table: &str, scope: &QueryScope) -> HostplaneResult<u64> {
        Ok(self
            .read()?
            .rows
            .iter()
            .filter(|row| row.table == table && row.visible(scope))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
root = 1

[[accounts]]
id = 1

[[accounts]]
id = 2
parent = 1

[[hosts]]
id = 10
failover_parent = 11

[[hosts]]
id = 11

[[users]]
username = "ops"
role = "scoped-operator"
hosts = [10]

[[users]]
username = "carol"
role = "tenant"
account = 2

[[protocol_versions]]
token = "1.0"
released_ms = 1000

[[tables]]
id = 7
name = "mailboxes"
since = "1.0"
"#;

    #[test]
    fn loads_and_answers_providers() {
        let metadata = StaticMetadata::from_toml(DOC).unwrap();
        assert_eq!(metadata.root().unwrap(), AccountId(1));
        assert_eq!(metadata.parent(AccountId(2)).unwrap(), Some(AccountId(1)));
        assert_eq!(
            metadata.failover_children(HostId(11)).unwrap(),
            BTreeSet::from([HostId(10)])
        );
        assert_eq!(
            metadata.classify("carol").unwrap(),
            Some(Principal::Tenant(AccountId(2)))
        );
        assert_eq!(metadata.classify("nobody").unwrap(), None);
        assert_eq!(metadata.tables().unwrap().len(), 1);
    }

    #[test]
    fn rejects_unknown_version_reference() {
        let doc = DOC.replace("since = \"1.0\"", "since = \"9.9\"");
        assert!(StaticMetadata::from_toml(&doc).is_err());
    }

    #[test]
    fn rejects_dangling_host_reference() {
        let doc = DOC.replace("failover_parent = 11", "failover_parent = 99");
        assert!(StaticMetadata::from_toml(&doc).is_err());
    }

    #[test]
    fn unavailable_store_fails_calls() {
        let metadata = StaticMetadata::from_toml(DOC).unwrap();
        metadata.set_unavailable(true);
        assert!(metadata.root().unwrap_err().is_retriable());
    }
}
