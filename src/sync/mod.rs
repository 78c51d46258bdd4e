//! Change propagation.
//!
//! - [`broadcast`] - Invalidation announcements
//! - [`gate`] - Per-host sync tickets and bounded drain waits

pub mod broadcast;
pub mod gate;
