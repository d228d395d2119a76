// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use super::*;

#[test]
fn defaults_point_at_localhost() {
    let config = AgentConfig::default();
    assert_eq!(config.controller_host, "localhost");
    assert_eq!(config.controller_port, 8600);
    assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
    assert!(config.controller_socket.is_none());
}

#[test]
fn node_name_is_required_and_validated() {
    let mut config = AgentConfig::default();
    assert!(matches!(config.require_node_name(), Err(ConfigError::MissingNodeName)));

    config.node_name = "bad name".to_string();
    assert!(matches!(config.require_node_name(), Err(ConfigError::Invalid(..))));

    config.node_name = "n1".to_string();
    config.require_node_name().unwrap();
}

#[test]
fn load_parses_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(
        &path,
        r#"
node_name = "n1"
controller_host = "ctl.fleet.local"
controller_port = 9000
token = "s3cret"
heartbeat_interval_ms = 500
log_level = "WARN"
"#,
    )
    .unwrap();

    let config = AgentConfig::load(Some(&path)).unwrap();
    assert_eq!(config.node_name, "n1");
    assert_eq!(config.controller_host, "ctl.fleet.local");
    assert_eq!(config.controller_port, 9000);
    assert_eq!(config.token.as_deref(), Some("s3cret"));
    assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
    assert_eq!(config.log_level, herd_core::LogLevel::Warn);
}

#[test]
fn state_dir_moves_the_local_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(
        &path,
        format!("node_name = \"n1\"\nstate_dir = \"{}\"\n", dir.path().display()),
    )
    .unwrap();

    let config = AgentConfig::load(Some(&path)).unwrap();
    assert_eq!(config.local_socket_path, dir.path().join("agent.sock"));
}
