// Config loading and validation tests

use telemetry_sync::config::AppConfig;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[polling]
fast_interval_ms = 2000
slow_interval_ms = 15000
fetch_timeout_ms = 10000
initial_backoff_ms = 5000
max_backoff_ms = 60000
failure_overlay_threshold = 3

[history]
capacity = 30
persist_every = 3
database_path = "data/dashboard.db"
max_pool_size = 4
flush_rate = 8

[publishing]
broadcast_capacity = 60

[monitoring]
stats_log_interval_secs = 60

[[targets]]
id = "ltn1"
name = "ltn1"
endpoint = "https://ltn1.example/api/stats"
description = "NAS"

[[targets]]
id = "ltn0"
name = "ltn0"
endpoint = "https://ltn0.example/api/stats"
"#;

const MINIMAL_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[[targets]]
id = "a"
name = "A"
endpoint = "http://a.local/api/stats"
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.history.database_path, "data/dashboard.db");
    assert_eq!(config.history.flush_rate, 8);
    assert_eq!(config.publishing.broadcast_capacity, 60);
    assert_eq!(config.targets.len(), 2);
    assert_eq!(config.targets[0].id, "ltn1");
    assert_eq!(config.targets[0].description, "NAS");
    assert_eq!(config.targets[1].description, "");
}

#[test]
fn test_config_defaults_when_sections_omitted() {
    let config = AppConfig::load_from_str(MINIMAL_CONFIG).expect("valid");
    assert_eq!(config.polling.fast_interval_ms, 2_000);
    assert_eq!(config.polling.slow_interval_ms, 15_000);
    assert_eq!(config.polling.fetch_timeout_ms, 10_000);
    assert_eq!(config.polling.initial_backoff_ms, 5_000);
    assert_eq!(config.polling.max_backoff_ms, 60_000);
    assert_eq!(config.polling.failure_overlay_threshold, 3);
    assert_eq!(config.history.capacity, 30);
    assert_eq!(config.history.persist_every, 3);
    assert!(config.history.persistence);
    assert_eq!(config.render.frame_interval_ms, 16);
    assert!(config.badges.enabled);
    assert_eq!(config.badges.interval_ms, 20_000);
    assert_eq!(config.badges.timeout_ms, 8_000);
    assert_eq!(config.monitoring.stats_log_interval_secs, 60);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_fast_interval_zero() {
    let bad = VALID_CONFIG.replace("fast_interval_ms = 2000", "fast_interval_ms = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("fast_interval_ms"));
}

#[test]
fn test_config_validation_rejects_max_backoff_below_initial() {
    let bad = VALID_CONFIG.replace("max_backoff_ms = 60000", "max_backoff_ms = 1000");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_backoff_ms"));
}

#[test]
fn test_config_validation_rejects_capacity_zero() {
    let bad = VALID_CONFIG.replace("capacity = 30", "capacity = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("history.capacity"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = VALID_CONFIG.replace("database_path = \"data/dashboard.db\"", "database_path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database_path"));
}

#[test]
fn test_config_empty_db_path_allowed_without_persistence() {
    let ok = VALID_CONFIG.replace(
        "database_path = \"data/dashboard.db\"",
        "database_path = \"\"\npersistence = false",
    );
    let config = AppConfig::load_from_str(&ok).expect("in-memory history needs no path");
    assert!(!config.history.persistence);
}

#[test]
fn test_config_validation_rejects_flush_rate_zero() {
    let bad = VALID_CONFIG.replace("flush_rate = 8", "flush_rate = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("flush_rate"));
}

#[test]
fn test_config_validation_rejects_broadcast_capacity_zero() {
    let bad = VALID_CONFIG.replace("broadcast_capacity = 60", "broadcast_capacity = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("broadcast_capacity"));
}

#[test]
fn test_config_validation_rejects_stats_log_interval_zero() {
    let bad = VALID_CONFIG.replace(
        "stats_log_interval_secs = 60",
        "stats_log_interval_secs = 0",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("stats_log_interval_secs"));
}

#[test]
fn test_config_validation_rejects_duplicate_target_ids() {
    let bad = VALID_CONFIG.replace("id = \"ltn0\"", "id = \"ltn1\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn test_config_validation_rejects_unsafe_target_id() {
    let bad = VALID_CONFIG.replace("id = \"ltn0\"", "id = \"ltn 0\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("targets.id"));
}

#[test]
fn test_config_validation_rejects_dashed_target_id() {
    let bad = VALID_CONFIG.replace("id = \"ltn0\"", "id = \"ltn-disk-x\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("targets.id"));
}

#[test]
fn test_config_validation_rejects_non_http_endpoint() {
    let bad = VALID_CONFIG.replace("https://ltn0.example/api/stats", "ftp://ltn0.example");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("endpoint"));
}

#[test]
fn test_config_validation_rejects_no_targets() {
    let bad = r#"
targets = []

[server]
port = 8081
host = "0.0.0.0"
"#;
    let err = AppConfig::load_from_str(bad).unwrap_err();
    assert!(err.to_string().contains("non-empty"));
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.targets.len(), 2);
}
