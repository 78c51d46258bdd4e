//! Hostplane - control-plane master core of a multi-tenant hosting platform.
//!
//! Hostplane decides what every authenticated caller may see and keeps that
//! decision cheap and current. Tenants see data owned by themselves and by the
//! resellers above them; scoped operators see the hosts they are assigned and
//! their failover relatives; unrestricted operators see everything. Clients on
//! older protocol versions keep seeing the table enumeration they were built
//! against.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          Session (identity + negotiated protocol version)       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌───────────────────────┐  ┌──────────────────────────────────────┐
//! │ ProtocolVersionBridge │→ │ TenantScopeResolver → QueryAuthorizer │
//! └───────────────────────┘  └──────────────────────────────────────┘
//!                                  │ AccessCache
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   InvalidationBroadcaster (evictions)  │  SyncGate (drain wait)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Runtime lifecycle and cache sweeping
//! - [`core::time`] - Wall-clock ticks and injectable clocks
//! - [`core::error`] - Error types and client code mapping
//!
//! ## Control
//! - [`control::identity`] - Identities and platform ids
//! - [`control::scope`] - Ownership chains and access scopes
//! - [`control::cache`] - Tagged TTL cache
//! - [`control::authorizer`] - Declarative per-table authorization
//!
//! ## Sync
//! - [`sync::broadcast`] - Commit-time invalidation announcements
//! - [`sync::gate`] - Per-host sync tickets and drain waits
//!
//! ## Protocol
//! - [`protocol::version`] - Versions and schema descriptors
//! - [`protocol::bridge`] - Ordinal to canonical id translation
//!
//! ## Metadata
//! - [`metadata::provider`] - External store traits
//! - [`metadata::fixture`] - TOML-backed snapshot
//!
//! ## Facade
//! - [`master`] - `Master` and per-connection `Session`
//!
//! # Key Invariants
//!
//! - Authorization failures and missing rows are indistinguishable to callers
//! - Cached entries are replaced, never edited, and never survive an
//!   announcement of a table they depend on
//! - Sync sequences are strictly increasing per host
//! - Protocol versions are ordered by release time only

// Core infrastructure
pub mod core;

// Identities, scopes, caching and authorization
pub mod control;

// Invalidation and sync
pub mod sync;

// Protocol version bridging
pub mod protocol;

// External metadata
pub mod metadata;

// Facade
pub mod master;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, time};
pub use control::{authorizer, cache, identity, scope};
pub use master::{Master, Providers, Session};
pub use ops::observability;
pub use protocol::{bridge, version};
pub use sync::{broadcast, gate};
