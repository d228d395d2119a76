// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Agent configuration: TOML file + `HERD_AGENT_*` env overrides.

use herd_core::LogLevel;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default interval between heartbeat ticks (and reconnect attempts
/// while the link is down).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("could not determine state directory")]
    NoStateDir,

    #[error("node name is required")]
    MissingNodeName,

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    node_name: Option<String>,
    controller_host: Option<String>,
    controller_port: Option<u16>,
    /// Connect over a UDS instead of TCP when set.
    controller_socket: Option<PathBuf>,
    token: Option<String>,
    heartbeat_interval_ms: Option<u64>,
    state_dir: Option<PathBuf>,
    local_socket_path: Option<PathBuf>,
    log_level: Option<String>,
}

/// Resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub node_name: String,
    pub controller_host: String,
    pub controller_port: u16,
    pub controller_socket: Option<PathBuf>,
    /// Shared token presented in the agent Hello.
    pub token: Option<String>,
    pub heartbeat_interval: Duration,
    pub state_dir: PathBuf,
    /// Local api socket for proxy helpers and diagnostics.
    pub local_socket_path: PathBuf,
    pub log_level: LogLevel,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let state_dir = default_state_dir().unwrap_or_else(|_| PathBuf::from("/run/herd-agent"));
        Self {
            node_name: String::new(),
            controller_host: "localhost".to_string(),
            controller_port: herd_wire_default_port(),
            controller_socket: None,
            token: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            local_socket_path: state_dir.join("agent.sock"),
            state_dir,
            log_level: LogLevel::Info,
        }
    }
}

/// The controller's default client/agent port.
fn herd_wire_default_port() -> u16 {
    8600
}

impl AgentConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
                toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?
            }
            None => FileConfig::default(),
        };
        let mut config = AgentConfig::default();
        config.apply_file(file)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Fails unless a node name was provided by file, env, or caller.
    pub fn require_node_name(&self) -> Result<(), ConfigError> {
        if self.node_name.is_empty() {
            return Err(ConfigError::MissingNodeName);
        }
        if !herd_core::is_valid_node_name(&self.node_name) {
            return Err(ConfigError::Invalid("node_name", self.node_name.clone()));
        }
        Ok(())
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(name) = file.node_name {
            self.node_name = name;
        }
        if let Some(host) = file.controller_host {
            self.controller_host = host;
        }
        if let Some(port) = file.controller_port {
            self.controller_port = port;
        }
        if let Some(path) = file.controller_socket {
            self.controller_socket = Some(path);
        }
        if let Some(token) = file.token {
            self.token = Some(token);
        }
        if let Some(ms) = file.heartbeat_interval_ms {
            self.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(dir) = file.state_dir {
            self.local_socket_path = dir.join("agent.sock");
            self.state_dir = dir;
        }
        if let Some(path) = file.local_socket_path {
            self.local_socket_path = path;
        }
        if let Some(level) = file.log_level {
            self.log_level = level
                .parse()
                .map_err(|_| ConfigError::Invalid("log_level", level.clone()))?;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(name) = std::env::var("HERD_AGENT_NODE_NAME") {
            self.node_name = name;
        }
        if let Ok(host) = std::env::var("HERD_AGENT_CONTROLLER_HOST") {
            self.controller_host = host;
        }
        if let Ok(port) = std::env::var("HERD_AGENT_CONTROLLER_PORT") {
            self.controller_port = port
                .parse()
                .map_err(|_| ConfigError::Invalid("HERD_AGENT_CONTROLLER_PORT", port.clone()))?;
        }
        Ok(())
    }
}

/// Resolve state directory like the controller, under `herd-agent`.
fn default_state_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("HERD_AGENT_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("herd-agent"));
    }
    dirs::home_dir()
        .map(|home| home.join(".local/state/herd-agent"))
        .ok_or(ConfigError::NoStateDir)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
