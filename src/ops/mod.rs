//! Operations and observability.
//!
//! - [`observability`] - Metrics and health checks

pub mod observability;
