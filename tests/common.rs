//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use hostplane::config::Config;
use hostplane::master::{Master, Providers};
use hostplane::metadata::fixture::StaticMetadata;
use hostplane::time::{ManualClock, Tick};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// The sample metadata snapshot shipped with the repository.
pub const METADATA: &str = include_str!("../config/metadata.toml");

/// Protocol version that predates the `domains` table.
pub const OLD_VERSION: &str = "2019.9";

/// Middle protocol version.
pub const MID_VERSION: &str = "2019.10";

/// Protocol version that includes the `domains` table.
pub const NEW_VERSION: &str = "2020.1";

/// Starting wall clock for manual-clock fixtures.
pub const START: Tick = Tick::new(1_700_000_000_000);

/// Write a configuration file.
pub fn create_config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    create_config_file(
        r#"
[cache]
ttl_seconds = 3600
"#,
    )
}

/// Load the sample metadata snapshot.
pub fn sample_metadata() -> Arc<StaticMetadata> {
    Arc::new(StaticMetadata::from_toml(METADATA).expect("sample metadata is valid"))
}

/// A master over the sample metadata with a controllable clock.
pub struct Fixture {
    pub metadata: Arc<StaticMetadata>,
    pub clock: Arc<ManualClock>,
    pub master: Arc<Master>,
}

impl Fixture {
    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }
}

/// Fixture with default configuration.
pub fn fixture() -> Fixture {
    fixture_with_config(Config::default())
}

/// Fixture with a specific configuration.
pub fn fixture_with_config(config: Config) -> Fixture {
    let metadata = sample_metadata();
    let clock = Arc::new(ManualClock::new(START));
    let master = Master::with_clock(
        &config,
        Providers::from_static(metadata.clone()),
        clock.clone(),
    )
    .expect("master builds");
    Fixture {
        metadata,
        clock,
        master: Arc::new(master),
    }
}

/// Configuration with a short drain timeout.
pub fn config_with_drain_timeout(seconds: u64) -> Config {
    let mut config = Config::default();
    config.sync.drain_timeout_seconds = seconds;
    config
}
