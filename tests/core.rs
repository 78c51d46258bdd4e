//! Core infrastructure tests.

mod common;

use hostplane::cache::ResourceClass;
use hostplane::config::{Config, ConfigOverrides};
use hostplane::error::HostplaneError;
use hostplane::metadata::fixture::StaticMetadata;
use hostplane::observability::metrics;
use hostplane::runtime::Runtime;
use std::time::Duration;

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_minimal_config() {
    let file = common::create_minimal_config();
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
    assert_eq!(config.cache.max_age(), Duration::from_secs(3600));
    assert_eq!(config.sync.drain_timeout(), Duration::from_secs(60));
    assert_eq!(config.paths.metadata, "config/metadata.toml");
}

#[test]
fn max_age_defaults_to_ttl() {
    let config = Config::from_toml(
        r#"
[cache]
ttl_seconds = 7200
"#,
    )
    .unwrap();
    assert_eq!(config.cache.max_age(), Duration::from_secs(7200));
}

#[test]
fn max_age_below_ttl_rejected() {
    let result = Config::from_toml(
        r#"
[cache]
ttl_seconds = 600
max_age_seconds = 60
"#,
    );
    assert!(result.unwrap_err().to_string().contains("max_age_seconds"));
}

#[test]
fn zero_drain_timeout_rejected() {
    let result = Config::from_toml(
        r#"
[sync]
drain_timeout_seconds = 0
"#,
    );
    assert!(result.is_err());
}

#[test]
fn oversized_drain_timeout_rejected() {
    let result = Config::from_toml(
        r#"
[sync]
drain_timeout_seconds = 1000000
"#,
    );
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("drain_timeout_seconds"));

    let mut config = Config::default();
    config.sync.drain_timeout_seconds = hostplane::config::MAX_DRAIN_TIMEOUT_SECONDS;
    config.validate().unwrap();
}

#[test]
fn unknown_resource_class_rejected() {
    let result = Config::from_toml(
        r#"
[invalidation.tables]
domains = ["dns-zone"]
"#,
    );
    assert!(result.is_err());
}

#[test]
fn invalidation_rules_parse() {
    let config = Config::from_toml(
        r#"
[invalidation.tables]
domains = ["host-topology", "row-count:mailboxes"]
"#,
    )
    .unwrap();
    let rules = config.invalidation_rules().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].0, "domains");
    assert_eq!(
        rules[0].1,
        vec![
            ResourceClass::HostTopology,
            ResourceClass::RowCount("mailboxes".to_string())
        ]
    );
}

#[test]
fn invalid_log_level_rejected() {
    let result = Config::from_toml(
        r#"
[telemetry]
log_level = "loud"
"#,
    );
    assert!(result.unwrap_err().to_string().contains("log_level"));
}

#[test]
fn overrides_apply() {
    let mut config = Config::default();
    config.apply_overrides(&ConfigOverrides {
        log_level: Some("debug".to_string()),
        metadata: Some("/tmp/meta.toml".to_string()),
    });
    assert_eq!(config.telemetry.log_level, "debug");
    assert_eq!(config.paths.metadata, "/tmp/meta.toml");
    config.validate().unwrap();
}

#[test]
fn sample_config_is_valid() {
    let config = Config::from_toml(include_str!("../config/hostplane.toml")).unwrap();
    assert_eq!(config.invalidation_rules().unwrap().len(), 1);
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn resource_class_tags_round_trip_through_display() {
    for tag in [
        "identity",
        "tenant-hierarchy",
        "host-topology",
        "protocol-metadata",
        "row-count:mailboxes",
    ] {
        let class: ResourceClass = tag.parse().unwrap();
        assert_eq!(class.to_string(), tag);
    }
    assert!("row-count:".parse::<ResourceClass>().is_err());
}

#[test]
fn unauthorized_and_missing_share_one_code() {
    let fixture = common::fixture();
    let carol = fixture.master.resolve_identity("carol").unwrap();

    let refused = fixture.master.authorize(&carol, "servers").unwrap_err();
    let missing = fixture.master.authorize(&carol, "no_such_table").unwrap_err();
    let unknown_user = fixture.master.resolve_identity("mallory").unwrap_err();

    for err in [refused, missing, unknown_user] {
        assert!(matches!(err, HostplaneError::NoAccess));
        assert_eq!(err.client_code(), "ENOACCESS");
    }
}

// ============================================================================
// Metadata fixture tests
// ============================================================================

#[test]
fn metadata_with_second_root_rejected() {
    let doc = format!("{}\n[[accounts]]\nid = 99\n", common::METADATA);
    assert!(StaticMetadata::from_toml(&doc).is_err());
}

#[test]
fn metadata_with_duplicate_rule_rejected() {
    let doc = format!(
        "{}\n[[table_rules]]\ntable = \"accounts\"\nscope = \"unrestricted\"\n",
        common::METADATA
    );
    assert!(StaticMetadata::from_toml(&doc).is_err());
}

// ============================================================================
// Runtime tests
// ============================================================================

#[tokio::test]
async fn runtime_starts_and_stops() {
    let mut config = Config::default();
    config.paths.metadata = format!("{}/config/metadata.toml", env!("CARGO_MANIFEST_DIR"));
    config.cache.sweep_interval_seconds = 1;

    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();
    assert!(runtime.is_running());
    assert!(runtime.is_ready());
    assert!(runtime.probe().healthy);

    let master = runtime.master().unwrap().clone();
    master.resolve_identity("carol").unwrap();
    assert_eq!(master.metrics().counter_get(metrics::CACHE_MISSES), 1);

    runtime.shutdown();
    runtime.stop().await.unwrap();
    assert!(!runtime.is_running());
    assert!(runtime.master().is_none());
}

#[tokio::test]
async fn shutdown_request_reaches_waiters() {
    let mut config = Config::default();
    config.paths.metadata = format!("{}/config/metadata.toml", env!("CARGO_MANIFEST_DIR"));

    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();
    let mut receiver = runtime.shutdown_receiver();
    assert!(!*receiver.borrow());

    runtime.shutdown();
    receiver.changed().await.unwrap();
    assert!(*receiver.borrow());
    tokio::time::timeout(Duration::from_secs(1), runtime.wait_for_shutdown())
        .await
        .unwrap();

    runtime.stop().await.unwrap();
    assert!(!runtime.is_running());
}

#[tokio::test]
async fn runtime_fails_on_missing_metadata() {
    let mut config = Config::default();
    config.paths.metadata = "/nonexistent/metadata.toml".to_string();

    let mut runtime = Runtime::new(config).unwrap();
    assert!(runtime.start().await.is_err());
    assert!(!runtime.is_alive());
}
