// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Agent startup and shutdown.

use crate::config::AgentConfig;
use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to acquire lock: agent already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Startup {
    pub local: UnixListener,
    // Held to maintain the exclusive lock; released on drop.
    #[allow(dead_code)]
    lock_file: File,
}

pub fn startup(config: &AgentConfig) -> Result<Startup, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    let lock_path = config.state_dir.join("agent.pid");
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    if let Some(parent) = config.local_socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if config.local_socket_path.exists() {
        warn!("removing stale socket {}", config.local_socket_path.display());
        std::fs::remove_file(&config.local_socket_path)?;
    }
    let local = UnixListener::bind(&config.local_socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.local_socket_path.clone(), e))?;

    info!(
        node = %config.node_name,
        socket = %config.local_socket_path.display(),
        "agent started"
    );
    Ok(Startup { local, lock_file })
}

pub fn shutdown(config: &AgentConfig) {
    info!("shutting down agent");
    if config.local_socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.local_socket_path) {
            warn!("failed to remove socket file: {}", e);
        }
    }
    let lock_path = config.state_dir.join("agent.pid");
    if lock_path.exists() {
        if let Err(e) = std::fs::remove_file(&lock_path) {
            warn!("failed to remove pid file: {}", e);
        }
    }
}
