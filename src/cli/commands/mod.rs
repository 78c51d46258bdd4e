//! CLI command implementations.

mod config;
mod inspect;
mod start;

pub use config::{run_config, ConfigArgs};
pub use inspect::{run_inspect, InspectArgs};
pub use start::{load_config, run_start, run_start_with_config, StartArgs};
