//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Runtime lifecycle
//! - [`time`] - Wall-clock ticks and clocks
//! - [`error`] - Error types and client code mapping

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
