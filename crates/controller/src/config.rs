// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Controller configuration: TOML file + `HERD_*` env overrides.

use herd_core::LogLevel;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default client/agent port.
pub const DEFAULT_PORT: u16 = 8600;

/// Default interval between liveness scans.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Default timeout for one controller→agent request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("could not determine state directory")]
    NoStateDir,

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Per-node policy from the `[nodes.<name>]` tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePolicy {
    /// Shared token the agent must present in its Hello frame.
    #[serde(default)]
    pub required_token: Option<String>,
}

/// TCP keep-alive tunables applied to every accepted socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeepAlive {
    pub idle_secs: u64,
    pub interval_secs: u64,
    pub count: u32,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self { idle_secs: 1, interval_secs: 1, count: 6 }
    }
}

/// On-disk shape of the controller config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    port: Option<u16>,
    listen_tcp: Option<bool>,
    listen_uds: Option<bool>,
    socket_path: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    heartbeat_interval_ms: Option<u64>,
    /// 0 disables the liveness check.
    heartbeat_threshold_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    allowed_node_names: Option<Vec<String>>,
    log_level: Option<String>,
    keepalive: KeepAlive,
    nodes: HashMap<String, NodePolicy>,
}

/// Resolved controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub listen_tcp: bool,
    pub listen_uds: bool,
    pub socket_path: PathBuf,
    pub state_dir: PathBuf,
    pub heartbeat_interval: Duration,
    /// Zero disables the liveness check; nodes never time out.
    pub heartbeat_threshold: Duration,
    pub request_timeout: Duration,
    /// When set, only these names may register.
    pub allowed_node_names: Option<Vec<String>>,
    pub log_level: LogLevel,
    pub keepalive: KeepAlive,
    pub node_policies: HashMap<String, NodePolicy>,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = default_state_dir().unwrap_or_else(|_| PathBuf::from("/run/herd"));
        Self {
            port: DEFAULT_PORT,
            listen_tcp: true,
            listen_uds: true,
            socket_path: state_dir.join("controller.sock"),
            state_dir,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_threshold: Duration::ZERO,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            allowed_node_names: None,
            log_level: LogLevel::Info,
            keepalive: KeepAlive::default(),
            node_policies: HashMap::new(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
                toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?
            }
            None => FileConfig::default(),
        };
        let mut config = Config::default();
        config.apply_file(file)?;
        config.apply_env()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(v) = file.listen_tcp {
            self.listen_tcp = v;
        }
        if let Some(v) = file.listen_uds {
            self.listen_uds = v;
        }
        if let Some(dir) = file.state_dir {
            self.socket_path = dir.join("controller.sock");
            self.state_dir = dir;
        }
        if let Some(path) = file.socket_path {
            self.socket_path = path;
        }
        if let Some(ms) = file.heartbeat_interval_ms {
            self.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.heartbeat_threshold_ms {
            self.heartbeat_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = file.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(names) = file.allowed_node_names {
            for name in &names {
                if !herd_core::is_valid_node_name(name) {
                    return Err(ConfigError::Invalid("allowed_node_names", name.clone()));
                }
            }
            self.allowed_node_names = Some(names);
        }
        if let Some(level) = file.log_level {
            self.log_level = level
                .parse()
                .map_err(|_| ConfigError::Invalid("log_level", level.clone()))?;
        }
        self.keepalive = file.keepalive;
        self.node_policies = file.nodes;
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = std::env::var("HERD_PORT") {
            self.port =
                port.parse().map_err(|_| ConfigError::Invalid("HERD_PORT", port.clone()))?;
        }
        if let Ok(path) = std::env::var("HERD_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("HERD_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Ok(ms) = std::env::var("HERD_HEARTBEAT_THRESHOLD_MS") {
            let parsed = ms
                .parse()
                .map_err(|_| ConfigError::Invalid("HERD_HEARTBEAT_THRESHOLD_MS", ms.clone()))?;
            self.heartbeat_threshold = Duration::from_millis(parsed);
        }
        Ok(())
    }

    /// Whether `name` may register, per the allow-list.
    pub fn name_allowed(&self, name: &str) -> bool {
        match &self.allowed_node_names {
            Some(names) => names.iter().any(|n| n == name),
            None => true,
        }
    }

    /// Names to provision at startup (allow-list plus policy tables).
    pub fn provisioned_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.allowed_node_names.clone().unwrap_or_default();
        for name in self.node_policies.keys() {
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// Resolve state directory: HERD_STATE_DIR > XDG_STATE_HOME/herd > ~/.local/state/herd
fn default_state_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("HERD_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("herd"));
    }
    dirs::home_dir().map(|home| home.join(".local/state/herd")).ok_or(ConfigError::NoStateDir)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
