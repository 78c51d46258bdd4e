//! Client ordinal to canonical id translation across protocol versions.
//!
//! A client enumerates tables (and each table's columns) densely from 0 in the
//! order it knew them when its protocol version was released. The bridge
//! builds that enumeration lazily for each version it is asked about, from the
//! descriptors valid at the version's release time, and caches it until the
//! descriptor metadata changes.
//!
//! Every reset bumps a generation counter. A catalog or view built across a
//! reset is still returned to its caller but never cached.
//!
//! For a fixed version the mapping is a bijection between `0..N` and the
//! canonical ids of the N descriptors valid at that version. Anything outside
//! it maps to [`UNMAPPED`].

use crate::control::cache::{CacheInvalidation, ResourceClass};
use crate::core::error::{HostplaneError, HostplaneResult};
use crate::metadata::provider::VersionRegistry;
use crate::protocol::version::{ProtocolVersion, ReleaseIndex, TableDescriptor};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel for an ordinal or id with no mapping at the requested version.
pub const UNMAPPED: i32 = -1;

/// Dense ordinal space over a list of canonical ids.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    canonical: Vec<i32>,
    ordinals: HashMap<i32, i32>,
}

impl Enumeration {
    fn new(canonical: Vec<i32>) -> Self {
        let ordinals = canonical
            .iter()
            .enumerate()
            .map(|(ordinal, &id)| (id, ordinal as i32))
            .collect();
        Self {
            canonical,
            ordinals,
        }
    }

    /// Canonical id at `ordinal`, or [`UNMAPPED`].
    pub fn to_canonical(&self, ordinal: i32) -> i32 {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| self.canonical.get(i).copied())
            .unwrap_or(UNMAPPED)
    }

    /// Ordinal of a canonical id, or [`UNMAPPED`].
    pub fn to_ordinal(&self, canonical: i32) -> i32 {
        self.ordinals.get(&canonical).copied().unwrap_or(UNMAPPED)
    }

    /// Canonical ids in ordinal order.
    pub fn canonical_ids(&self) -> &[i32] {
        &self.canonical
    }

    /// Size of the ordinal space.
    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    /// Check if the ordinal space is empty.
    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

/// Table and column enumerations as seen by one protocol version.
#[derive(Debug, Clone)]
pub struct VersionView {
    version: ProtocolVersion,
    tables: Enumeration,
    columns: HashMap<i32, Enumeration>,
}

impl VersionView {
    /// The protocol version this view belongs to.
    pub fn version(&self) -> &ProtocolVersion {
        &self.version
    }

    /// Table enumeration.
    pub fn tables(&self) -> &Enumeration {
        &self.tables
    }

    /// Column enumeration of a canonical table, if the table exists at this version.
    pub fn columns(&self, canonical_table: i32) -> Option<&Enumeration> {
        self.columns.get(&canonical_table)
    }
}

/// Versions and descriptors as last read from the registry.
struct Catalog {
    versions: HashMap<String, ProtocolVersion>,
    index: ReleaseIndex,
    tables: Vec<TableDescriptor>,
}

impl Catalog {
    fn load(registry: &dyn VersionRegistry) -> HostplaneResult<Self> {
        let versions = registry.versions()?;
        let index = ReleaseIndex::new(&versions)?;
        let tables = registry.tables()?;

        let mut table_ids = HashSet::new();
        for table in &tables {
            if !table_ids.insert(table.id) {
                return Err(HostplaneError::metadata(format!(
                    "duplicate canonical table id {}",
                    table.id
                )));
            }
            let mut column_ids = HashSet::new();
            for column in &table.columns {
                if !column_ids.insert(column.id) {
                    return Err(HostplaneError::metadata(format!(
                        "duplicate canonical column id {} in table {}",
                        column.id, table.name
                    )));
                }
            }
        }

        Ok(Self {
            versions: versions
                .into_iter()
                .map(|v| (v.token.clone(), v))
                .collect(),
            index,
            tables,
        })
    }

    fn build_view(&self, version: &ProtocolVersion) -> HostplaneResult<VersionView> {
        let at = version.released_ms;
        let mut table_ids = Vec::new();
        let mut columns = HashMap::new();
        for table in &self.tables {
            if !self.index.covers(&table.validity, at)? {
                continue;
            }
            table_ids.push(table.id);
            let mut column_ids = Vec::new();
            for column in &table.columns {
                if self.index.covers(&column.validity, at)? {
                    column_ids.push(column.id);
                }
            }
            columns.insert(table.id, Enumeration::new(column_ids));
        }
        Ok(VersionView {
            version: version.clone(),
            tables: Enumeration::new(table_ids),
            columns,
        })
    }
}

/// Translates protocol-relative ordinals to canonical ids and back.
pub struct ProtocolVersionBridge {
    registry: Arc<dyn VersionRegistry>,
    catalog: RwLock<Option<Arc<Catalog>>>,
    views: RwLock<HashMap<String, Arc<VersionView>>>,
    generation: AtomicU64,
}

impl ProtocolVersionBridge {
    /// Create a bridge over a version registry.
    pub fn new(registry: Arc<dyn VersionRegistry>) -> Self {
        Self {
            registry,
            catalog: RwLock::new(None),
            views: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Enumeration view for a version, built on first use.
    pub fn view(&self, version: &str) -> HostplaneResult<Arc<VersionView>> {
        if let Some(view) = self.views.read().get(version) {
            return Ok(Arc::clone(view));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let catalog = self.catalog()?;
        let protocol = catalog.versions.get(version).ok_or_else(|| {
            HostplaneError::UnknownProtocolVersion {
                version: version.to_string(),
            }
        })?;
        let view = Arc::new(catalog.build_view(protocol)?);
        tracing::debug!(
            version = %version,
            tables = view.tables.len(),
            "built protocol version view"
        );

        let mut views = self.views.write();
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!(version = %version, "descriptors changed during build, not caching view");
            return Ok(view);
        }
        Ok(Arc::clone(
            views.entry(version.to_string()).or_insert(view),
        ))
    }

    /// Canonical table id at a client ordinal, or [`UNMAPPED`].
    pub fn client_ordinal_to_canonical(&self, version: &str, ordinal: i32) -> HostplaneResult<i32> {
        self.lookup(version, |view| view.tables.to_canonical(ordinal))
    }

    /// Client ordinal of a canonical table id, or [`UNMAPPED`].
    pub fn canonical_to_client_ordinal(
        &self,
        version: &str,
        canonical: i32,
    ) -> HostplaneResult<i32> {
        self.lookup(version, |view| view.tables.to_ordinal(canonical))
    }

    /// Canonical column id at a client column ordinal of a canonical table, or [`UNMAPPED`].
    pub fn client_column_to_canonical(
        &self,
        version: &str,
        canonical_table: i32,
        ordinal: i32,
    ) -> HostplaneResult<i32> {
        self.lookup(version, |view| {
            view.columns(canonical_table)
                .map_or(UNMAPPED, |cols| cols.to_canonical(ordinal))
        })
    }

    /// Client column ordinal of a canonical column id, or [`UNMAPPED`].
    pub fn canonical_to_client_column(
        &self,
        version: &str,
        canonical_table: i32,
        canonical_column: i32,
    ) -> HostplaneResult<i32> {
        self.lookup(version, |view| {
            view.columns(canonical_table)
                .map_or(UNMAPPED, |cols| cols.to_ordinal(canonical_column))
        })
    }

    /// Canonical table id at a client ordinal, rejecting unmapped ordinals.
    pub fn require_table(&self, version: &str, ordinal: i32) -> HostplaneResult<i32> {
        match self.client_ordinal_to_canonical(version, ordinal)? {
            UNMAPPED => Err(HostplaneError::protocol_mismatch(
                version,
                "table ordinal",
                i64::from(ordinal),
            )),
            id => Ok(id),
        }
    }

    /// Canonical column id at a client column ordinal, rejecting unmapped ordinals.
    pub fn require_column(
        &self,
        version: &str,
        canonical_table: i32,
        ordinal: i32,
    ) -> HostplaneResult<i32> {
        match self.client_column_to_canonical(version, canonical_table, ordinal)? {
            UNMAPPED => Err(HostplaneError::protocol_mismatch(
                version,
                "column ordinal",
                i64::from(ordinal),
            )),
            id => Ok(id),
        }
    }

    /// Name of a canonical table id, if it exists in the registry.
    pub fn table_name(&self, canonical: i32) -> HostplaneResult<Option<String>> {
        Ok(self
            .catalog()?
            .tables
            .iter()
            .find(|t| t.id == canonical)
            .map(|t| t.name.clone()))
    }

    /// Drop the cached catalog and every per-version view.
    pub fn reset(&self) -> usize {
        let mut catalog = self.catalog.write();
        let mut views = self.views.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *catalog = None;
        let dropped = views.len();
        views.clear();
        dropped
    }

    /// Number of resets so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of cached version views.
    pub fn cached_views(&self) -> usize {
        self.views.read().len()
    }

    fn lookup(
        &self,
        version: &str,
        f: impl FnOnce(&VersionView) -> i32,
    ) -> HostplaneResult<i32> {
        match self.view(version) {
            Ok(view) => Ok(f(&view)),
            Err(HostplaneError::UnknownProtocolVersion { .. }) => {
                tracing::debug!(version = %version, "lookup against unknown protocol version");
                Ok(UNMAPPED)
            }
            Err(e) => Err(e),
        }
    }

    fn catalog(&self) -> HostplaneResult<Arc<Catalog>> {
        if let Some(catalog) = self.catalog.read().as_ref() {
            return Ok(Arc::clone(catalog));
        }
        let generation = self.generation.load(Ordering::Acquire);
        let loaded = Arc::new(Catalog::load(self.registry.as_ref())?);
        let mut slot = self.catalog.write();
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(loaded);
        }
        Ok(Arc::clone(slot.get_or_insert(loaded)))
    }
}

impl CacheInvalidation for ProtocolVersionBridge {
    fn cache_name(&self) -> &str {
        "protocol-bridge"
    }

    fn invalidate(&self, class: &ResourceClass) -> usize {
        if *class == ResourceClass::ProtocolMetadata {
            self.reset()
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_is_dense_and_invertible() {
        let e = Enumeration::new(vec![10, 40, 20]);
        for ordinal in 0..3 {
            let id = e.to_canonical(ordinal);
            assert_eq!(e.to_ordinal(id), ordinal);
        }
        assert_eq!(e.to_canonical(3), UNMAPPED);
        assert_eq!(e.to_canonical(-1), UNMAPPED);
        assert_eq!(e.to_ordinal(99), UNMAPPED);
    }
}
