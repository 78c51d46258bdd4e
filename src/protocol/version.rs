//! Protocol versions and schema descriptors.
//!
//! Protocol versions are opaque tokens ordered by their release timestamp,
//! never by the token text: `"2019.10"` and `"2019.9"` compare by when they
//! shipped. Table and column descriptors are valid over the half-open range
//! `[since, last)` of release timestamps.

use crate::core::error::{HostplaneError, HostplaneResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A client-negotiated protocol version token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Opaque version token as sent by clients.
    pub token: String,
    /// Release timestamp in milliseconds; the only ordering key.
    pub released_ms: u64,
}

impl ProtocolVersion {
    /// Create a new protocol version.
    pub fn new(token: impl Into<String>, released_ms: u64) -> Self {
        Self {
            token: token.into(),
            released_ms,
        }
    }
}

/// Validity range of a descriptor, expressed in version tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    /// First version the descriptor appears in.
    pub since: String,
    /// First version the descriptor no longer appears in; open-ended if absent.
    #[serde(default)]
    pub last: Option<String>,
}

impl Validity {
    /// Valid from `since` onwards.
    pub fn since(token: impl Into<String>) -> Self {
        Self {
            since: token.into(),
            last: None,
        }
    }

    /// Close the range at `token` (exclusive).
    pub fn until(mut self, token: impl Into<String>) -> Self {
        self.last = Some(token.into());
        self
    }
}

/// Column descriptor within a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Canonical column id, stable across versions.
    pub id: i32,
    /// Column name.
    pub name: String,
    /// Validity range.
    #[serde(flatten)]
    pub validity: Validity,
}

/// Table descriptor with its columns in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Canonical table id, stable across versions.
    pub id: i32,
    /// Table name.
    pub name: String,
    /// Validity range.
    #[serde(flatten)]
    pub validity: Validity,
    /// Columns in canonical enumeration order.
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

/// Release-time lookup for version tokens.
#[derive(Debug, Clone, Default)]
pub struct ReleaseIndex {
    released: HashMap<String, u64>,
}

impl ReleaseIndex {
    /// Build an index over the given versions.
    ///
    /// Duplicate tokens are rejected.
    pub fn new(versions: &[ProtocolVersion]) -> HostplaneResult<Self> {
        let mut released = HashMap::with_capacity(versions.len());
        for version in versions {
            if released
                .insert(version.token.clone(), version.released_ms)
                .is_some()
            {
                return Err(HostplaneError::metadata(format!(
                    "duplicate protocol version token {}",
                    version.token
                )));
            }
        }
        Ok(Self { released })
    }

    /// Release timestamp of a token.
    pub fn released_ms(&self, token: &str) -> Option<u64> {
        self.released.get(token).copied()
    }

    /// Check whether a validity range covers a release timestamp.
    pub fn covers(&self, validity: &Validity, at_ms: u64) -> HostplaneResult<bool> {
        let since = self.resolve(&validity.since)?;
        if at_ms < since {
            return Ok(false);
        }
        match &validity.last {
            Some(last) => Ok(at_ms < self.resolve(last)?),
            None => Ok(true),
        }
    }

    fn resolve(&self, token: &str) -> HostplaneResult<u64> {
        self.released_ms(token).ok_or_else(|| {
            HostplaneError::metadata(format!("descriptor references unknown version {}", token))
        })
    }

    /// Number of indexed versions.
    pub fn len(&self) -> usize {
        self.released.len()
    }

    /// Check if no versions are indexed.
    pub fn is_empty(&self) -> bool {
        self.released.is_empty()
    }
}
