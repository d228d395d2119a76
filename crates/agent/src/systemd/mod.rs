// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Adapter boundary to the local systemd instance.
//!
//! Only the operations the agent core invokes are modeled. The
//! production implementation speaks D-Bus to org.freedesktop.systemd1;
//! tests script a [`FakeSystemd`].

mod fake;
mod zbus_impl;

pub use fake::FakeSystemd;
pub use zbus_impl::ZbusSystemd;

use async_trait::async_trait;
use herd_core::unit::UnitProperties;
use herd_core::{ActiveState, JobState, UnitFileInfo, UnitInfo};
use thiserror::Error;
use tokio::sync::mpsc;

/// Unit file change rows as `(change_type, file, destination)`.
pub type UnitFileChanges = Vec<(String, String, String)>;

#[derive(Debug, Error)]
pub enum SystemdError {
    #[error("no such unit: {0}")]
    NoSuchUnit(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("unsupported property value for {0}")]
    UnsupportedProperty(String),
}

/// Signals observed on the systemd bus, pre-chewed for the agent core.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemdEvent {
    UnitNew { name: String, path: String },
    UnitRemoved { name: String, path: String },
    UnitStateChanged { name: String, path: String, active: ActiveState, sub: String },
    UnitPropertiesChanged { name: String, interface: String, props: UnitProperties },
    /// A queued job left the queue, with its result string.
    JobRemoved { path: String, result: String },
    /// Property change on a job object still in the table.
    JobStateChanged { path: String, state: JobState },
}

/// Operations the agent invokes on systemd.
#[async_trait]
pub trait SystemdManager: Send + Sync {
    /// Lifecycle methods return the queued systemd job's object path.
    async fn start_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError>;
    async fn stop_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError>;
    async fn restart_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError>;
    async fn reload_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError>;
    async fn cancel_job(&self, job_path: &str) -> Result<(), SystemdError>;

    async fn list_units(&self) -> Result<Vec<UnitInfo>, SystemdError>;
    async fn list_unit_files(&self) -> Result<Vec<UnitFileInfo>, SystemdError>;

    /// Current `(active, sub)` state of a loaded unit; `NoSuchUnit`
    /// when it is not loaded.
    async fn get_unit_state(&self, unit: &str) -> Result<(ActiveState, String), SystemdError>;

    async fn get_unit_properties(
        &self,
        unit: &str,
        interface: &str,
    ) -> Result<UnitProperties, SystemdError>;
    async fn get_unit_property(
        &self,
        unit: &str,
        interface: &str,
        property: &str,
    ) -> Result<serde_json::Value, SystemdError>;
    async fn set_unit_properties(
        &self,
        unit: &str,
        runtime: bool,
        props: UnitProperties,
    ) -> Result<(), SystemdError>;

    async fn freeze_unit(&self, unit: &str) -> Result<(), SystemdError>;
    async fn thaw_unit(&self, unit: &str) -> Result<(), SystemdError>;
    async fn kill_unit(&self, unit: &str, whom: &str, signal: i32) -> Result<(), SystemdError>;
    async fn reset_failed(&self, unit: Option<&str>) -> Result<(), SystemdError>;

    async fn enable_unit_files(
        &self,
        files: &[String],
        runtime: bool,
        force: bool,
    ) -> Result<(bool, UnitFileChanges), SystemdError>;
    async fn disable_unit_files(
        &self,
        files: &[String],
        runtime: bool,
    ) -> Result<UnitFileChanges, SystemdError>;

    async fn daemon_reload(&self) -> Result<(), SystemdError>;

    /// Subscribe to change signals; events flow until the manager is
    /// dropped.
    async fn subscribe_events(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<SystemdEvent>, SystemdError>;
}

/// Escape a unit name into its systemd object path, `_xx` hex escapes
/// for anything outside `[A-Za-z0-9]`.
pub fn unit_object_path(unit: &str) -> String {
    let mut escaped = String::with_capacity(unit.len());
    for byte in unit.bytes() {
        if byte.is_ascii_alphanumeric() {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{byte:02x}"));
        }
    }
    format!("/org/freedesktop/systemd1/unit/{escaped}")
}

/// Inverse of [`unit_object_path`]; `None` for paths outside the unit
/// namespace or with malformed escapes.
pub fn unit_name_from_path(path: &str) -> Option<String> {
    let escaped = path.strip_prefix("/org/freedesktop/systemd1/unit/")?;
    let mut name = String::with_capacity(escaped.len());
    let bytes = escaped.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let hex = escaped.get(i + 1..i + 3)?;
            let byte = u8::from_str_radix(hex, 16).ok()?;
            name.push(byte as char);
            i += 3;
        } else {
            name.push(bytes[i] as char);
            i += 1;
        }
    }
    Some(name)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
