//! Error types and client-facing code mapping.
//!
//! Hostplane collapses every authorization outcome a caller is not entitled to
//! distinguish into [`HostplaneError::NoAccess`]. Error codes returned by
//! [`HostplaneError::client_code`] are stable string constants.

use thiserror::Error;

/// Common Hostplane error conditions.
#[derive(Debug, Error)]
pub enum HostplaneError {
    /// The caller may not see the requested resource, or it does not exist.
    ///
    /// The two cases are never differentiated.
    #[error("no access")]
    NoAccess,

    /// The ownership tree contains a cycle reachable from `account`.
    #[error("ownership cycle detected starting at account {account}")]
    OwnershipCycle { account: u64 },

    /// The ownership chain starting at `account` is longer than the platform bound.
    #[error("ownership chain from account {account} exceeds {max_depth} hops")]
    ChainTooDeep { account: u64, max_depth: usize },

    /// A non-root account on the chain from `account` has no parent.
    #[error("account {detached} above account {account} has no parent but is not the root")]
    DetachedAccount { account: u64, detached: u64 },

    /// A client ordinal or canonical id has no mapping at the negotiated version.
    #[error("protocol mismatch: {kind} {value} is not defined at version {version}")]
    ProtocolMismatch {
        version: String,
        kind: &'static str,
        value: i64,
    },

    /// The protocol version token is not present in the registry.
    #[error("unknown protocol version: {version}")]
    UnknownProtocolVersion { version: String },

    /// The external metadata store failed or returned inconsistent data.
    #[error("metadata error: {message}")]
    Metadata { message: String },

    /// Invalid request.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl HostplaneError {
    /// Create a Metadata error.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }

    /// Create an InvalidRequest error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a ProtocolMismatch error.
    pub fn protocol_mismatch(version: impl Into<String>, kind: &'static str, value: i64) -> Self {
        Self::ProtocolMismatch {
            version: version.into(),
            kind,
            value,
        }
    }

    /// Check if this error signals corrupted platform metadata rather than a bad request.
    pub fn is_internal_inconsistency(&self) -> bool {
        matches!(
            self,
            Self::OwnershipCycle { .. }
                | Self::ChainTooDeep { .. }
                | Self::DetachedAccount { .. }
                | Self::Internal { .. }
        )
    }

    /// Check if the operation may succeed when retried unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Metadata { .. })
    }

    /// Stable error code handed to clients.
    ///
    /// Inconsistency details are not exposed; callers only learn that the
    /// request failed on the server side.
    pub fn client_code(&self) -> &'static str {
        match self {
            Self::NoAccess => "ENOACCESS",
            Self::ProtocolMismatch { .. } | Self::UnknownProtocolVersion { .. } => "EPROTO",
            Self::InvalidRequest { .. } => "EINVAL",
            Self::Metadata { .. } => "EAGAIN",
            Self::OwnershipCycle { .. }
            | Self::ChainTooDeep { .. }
            | Self::DetachedAccount { .. }
            | Self::Internal { .. } => "EINTERNAL",
        }
    }
}

/// Result type using HostplaneError.
pub type HostplaneResult<T> = Result<T, HostplaneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inconsistency_errors_are_flagged() {
        assert!(HostplaneError::OwnershipCycle { account: 4 }.is_internal_inconsistency());
        assert!(HostplaneError::ChainTooDeep {
            account: 4,
            max_depth: 11
        }
        .is_internal_inconsistency());
        assert!(HostplaneError::DetachedAccount {
            account: 4,
            detached: 7
        }
        .is_internal_inconsistency());
        assert!(!HostplaneError::NoAccess.is_internal_inconsistency());
    }

    #[test]
    fn client_codes_hide_inconsistency_details() {
        let err = HostplaneError::OwnershipCycle { account: 9 };
        assert_eq!(err.client_code(), "EINTERNAL");
        assert_eq!(HostplaneError::NoAccess.client_code(), "ENOACCESS");
        assert_eq!(
            HostplaneError::protocol_mismatch("2020.1", "table ordinal", 7).client_code(),
            "EPROTO"
        );
    }

    #[test]
    fn only_metadata_errors_are_retriable() {
        assert!(HostplaneError::metadata("connection reset").is_retriable());
        assert!(!HostplaneError::NoAccess.is_retriable());
        assert!(!HostplaneError::internal("boom").is_retriable());
    }
}
