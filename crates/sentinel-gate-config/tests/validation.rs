// sentinel-gate-config/tests/validation.rs
// ============================================================================
// Integration tests: configuration loading and validation end-to-end.
// ============================================================================

use std::io::Write as _;

use sentinel_gate_config::{ConfigError, GatewayConfig};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}

#[test]
fn full_config_round_trips_and_validates() {
    let contents = r#"
[server]
http_listen_addr = "0.0.0.0:9090"
stdio_enabled = true

[rate_limit.ip]
rate = 5
burst = 2
period_ms = 1000

[rate_limit.user]
rate = 50
burst = 10
period_ms = 1000

[audit]
log_dir = "/var/log/sentinel-gate"
channel_size = 5000
send_timeout_ms = 250
max_file_size = 1048576
retention_days = 14
cache_size = 500
log_arguments = true

[dev]
allow_devmode = false
"#;
    let file = write_config(contents);
    let config = GatewayConfig::load(Some(file.path())).expect("loads and validates");
    assert_eq!(config.server.http_listen_addr, "0.0.0.0:9090");
    assert_eq!(config.rate_limit.ip.rate, 5);
    assert_eq!(config.audit.retention_days, 14);
}

#[test]
fn negative_looking_retention_days_out_of_bounds_is_rejected() {
    let file = write_config("[audit]\nretention_days = 0\n");
    let result = GatewayConfig::load(Some(file.path()));
    assert!(matches!(result, Err(ConfigError::InvalidField { field, .. }) if field == "audit.retention_days"));
}

#[test]
fn empty_allowed_tool_name_entry_is_rejected() {
    let file = write_config("[router]\nallowed_tool_names = [\"ok\", \"\"]\n");
    let result = GatewayConfig::load(Some(file.path()));
    assert!(matches!(result, Err(ConfigError::InvalidField { field, .. }) if field == "router.allowed_tool_names"));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let file = write_config("this is not toml {{{");
    let result = GatewayConfig::load(Some(file.path()));
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}
