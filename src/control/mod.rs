//! Identities, access scopes, caching and authorization.
//!
//! - [`identity`] - Caller identities and platform ids
//! - [`scope`] - Ownership chains and access scope resolution
//! - [`cache`] - Tagged TTL cache with class invalidation
//! - [`authorizer`] - Declarative per-table authorization

pub mod authorizer;
pub mod cache;
pub mod identity;
pub mod scope;
