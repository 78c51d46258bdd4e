//! Protocol version compatibility.
//!
//! - [`version`] - Versions, validity ranges and descriptors
//! - [`bridge`] - Client ordinal to canonical id translation

pub mod bridge;
pub mod version;
