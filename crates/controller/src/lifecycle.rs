// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Daemon startup and shutdown.
//!
//! Ordering: state dir, lock file, then sockets last so a failed
//! startup never leaves a bound socket behind. A stale UDS path is
//! unlinked exactly once; a second bind failure is fatal.

use crate::config::Config;
use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to acquire lock: controller already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("failed to bind tcp port {0}: {1}")]
    TcpBindFailed(u16, std::io::Error),

    #[error("bad inherited listener: {0}")]
    BadInheritedFd(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sockets and resources produced by startup.
pub struct Startup {
    pub uds: Option<UnixListener>,
    pub tcp: Option<TcpListener>,
    pub inherited_uds: Vec<UnixListener>,
    pub inherited_tcp: Vec<TcpListener>,
    // Held to maintain the exclusive lock; released on drop.
    #[allow(dead_code)]
    lock_file: File,
}

pub fn startup(config: &Config) -> Result<Startup, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Lock first so two controllers can't race for the sockets. Avoid
    // truncating before the lock is held: the file may carry the pid of
    // a live controller.
    let lock_path = config.state_dir.join("controller.pid");
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    let uds = if config.listen_uds {
        if let Some(parent) = config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if config.socket_path.exists() {
            warn!("removing stale socket {}", config.socket_path.display());
            std::fs::remove_file(&config.socket_path)?;
        }
        let listener = UnixListener::bind(&config.socket_path)
            .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;
        Some(listener)
    } else {
        None
    };

    let tcp = if config.listen_tcp {
        let std_listener = std::net::TcpListener::bind(("0.0.0.0", config.port))
            .map_err(|e| LifecycleError::TcpBindFailed(config.port, e))?;
        std_listener.set_nonblocking(true)?;
        Some(TcpListener::from_std(std_listener)?)
    } else {
        None
    };

    let (inherited_uds, inherited_tcp) = inherited_listeners()?;

    info!(
        port = config.port,
        uds = %config.socket_path.display(),
        "controller listening"
    );
    Ok(Startup { uds, tcp, inherited_uds, inherited_tcp, lock_file })
}

/// Remove the transient filesystem artifacts on clean shutdown.
pub fn shutdown(config: &Config) {
    info!("shutting down controller");
    if config.socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.socket_path) {
            warn!("failed to remove socket file: {}", e);
        }
    }
    let lock_path = config.state_dir.join("controller.pid");
    if lock_path.exists() {
        if let Err(e) = std::fs::remove_file(&lock_path) {
            warn!("failed to remove pid file: {}", e);
        }
    }
}

/// Listeners inherited from a supervising init via the `LISTEN_FDS`
/// convention: fds starting at 3, valid only when `LISTEN_PID` names
/// this process.
fn inherited_listeners() -> Result<(Vec<UnixListener>, Vec<TcpListener>), LifecycleError> {
    const LISTEN_FDS_START: i32 = 3;

    let Ok(pid) = std::env::var("LISTEN_PID") else {
        return Ok((Vec::new(), Vec::new()));
    };
    if pid.parse::<u32>() != Ok(std::process::id()) {
        return Ok((Vec::new(), Vec::new()));
    }
    let count: i32 = std::env::var("LISTEN_FDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let mut uds = Vec::new();
    let mut tcp = Vec::new();
    for fd in LISTEN_FDS_START..LISTEN_FDS_START + count {
        let socket = socket_from_fd(fd);
        socket.set_nonblocking(true)?;
        let addr = socket
            .local_addr()
            .map_err(|e| LifecycleError::BadInheritedFd(format!("fd {fd}: {e}")))?;
        if addr.is_unix() {
            let listener: std::os::unix::net::UnixListener = socket.into();
            uds.push(UnixListener::from_std(listener)?);
        } else {
            let listener: std::net::TcpListener = socket.into();
            tcp.push(TcpListener::from_std(listener)?);
        }
        info!(fd, "adopted inherited listener");
    }
    Ok((uds, tcp))
}

/// The one place ownership of a raw inherited fd is assumed.
#[allow(unsafe_code)]
fn socket_from_fd(fd: i32) -> socket2::Socket {
    use std::os::fd::FromRawFd;
    // LISTEN_PID was verified; the supervisor handed us this fd.
    unsafe { socket2::Socket::from_raw_fd(fd) }
}
