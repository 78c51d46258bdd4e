//! External metadata.
//!
//! - [`provider`] - Store traits consumed by the master core
//! - [`fixture`] - TOML-backed in-memory implementation

pub mod fixture;
pub mod provider;
