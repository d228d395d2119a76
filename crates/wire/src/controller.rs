// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Controller → agent messages.

use crate::errcode::WireError;
use herd_core::{ActiveState, EventReason, JobId, LogLevel, ProxyId, UnitFileInfo, UnitInfo};
use herd_core::unit::UnitProperties;
use serde::{Deserialize, Serialize};

/// Message sent by the controller to an agent peer.
///
/// Requests carry a `serial` answered by `AgentMessage::Reply`; the
/// proxy target feed is signal-only, addressed at one proxy id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControllerMessage {
    /// An operation the agent must execute and answer.
    #[serde(rename = "req")]
    Request { serial: u64, op: AgentOp },

    /// Answer to an agent-originated request (`Register`).
    #[serde(rename = "reply")]
    Reply { serial: u64, result: OpResult },

    /// The proxy's target unit is now tracked.
    #[serde(rename = "proxy:target_new")]
    ProxyTargetNew { proxy: ProxyId },

    /// The proxy's target unit changed state.
    #[serde(rename = "proxy:target_state")]
    ProxyTargetStateChanged {
        proxy: ProxyId,
        active: ActiveState,
        sub: String,
        reason: EventReason,
    },

    /// The proxy's target unit is gone.
    #[serde(rename = "proxy:target_removed")]
    ProxyTargetRemoved { proxy: ProxyId, reason: EventReason },

    /// The proxy could not be established.
    #[serde(rename = "proxy:error")]
    ProxyError { proxy: ProxyId, message: String },
}

/// An operation the controller asks an agent to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum AgentOp {
    #[serde(rename = "unit:start")]
    StartUnit { unit: String, mode: String, job: JobId },

    #[serde(rename = "unit:stop")]
    StopUnit { unit: String, mode: String, job: JobId },

    #[serde(rename = "unit:restart")]
    RestartUnit { unit: String, mode: String, job: JobId },

    #[serde(rename = "unit:reload")]
    ReloadUnit { unit: String, mode: String, job: JobId },

    #[serde(rename = "job:cancel")]
    CancelJob { job: JobId },

    #[serde(rename = "unit:list")]
    ListUnits,

    #[serde(rename = "unit_files:list")]
    ListUnitFiles,

    #[serde(rename = "unit:properties")]
    GetUnitProperties { unit: String, interface: String },

    #[serde(rename = "unit:property")]
    GetUnitProperty { unit: String, interface: String, property: String },

    #[serde(rename = "unit:set_properties")]
    SetUnitProperties { unit: String, runtime: bool, props: UnitProperties },

    #[serde(rename = "unit:freeze")]
    FreezeUnit { unit: String },

    #[serde(rename = "unit:thaw")]
    ThawUnit { unit: String },

    #[serde(rename = "unit:kill")]
    KillUnit { unit: String, whom: String, signal: i32 },

    /// Reset the failed state of one unit, or of every unit when
    /// `unit` is absent.
    #[serde(rename = "unit:reset_failed")]
    ResetFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },

    #[serde(rename = "unit_files:enable")]
    EnableUnitFiles { files: Vec<String>, runtime: bool, force: bool },

    #[serde(rename = "unit_files:disable")]
    DisableUnitFiles { files: Vec<String>, runtime: bool },

    /// systemd daemon-reload.
    #[serde(rename = "daemon:reload")]
    Reload,

    #[serde(rename = "log:level")]
    SetLogLevel { level: LogLevel },

    /// Register interest in one unit, or everything with `*`.
    #[serde(rename = "subscribe")]
    Subscribe { unit: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { unit: String },

    /// Start the dependency unit `herd-dep@{unit}.service`.
    #[serde(rename = "dep:start")]
    StartDep { unit: String },

    #[serde(rename = "dep:stop")]
    StopDep { unit: String },

    #[serde(rename = "metrics:enable")]
    EnableMetrics,

    #[serde(rename = "metrics:disable")]
    DisableMetrics,
}

/// Result payload of one agent-side operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OpResult {
    #[serde(rename = "ok")]
    Ok,

    #[serde(rename = "err")]
    Err { error: WireError },

    /// Lifecycle op accepted; the agent queued a systemd job.
    #[serde(rename = "job")]
    Job { job: JobId },

    #[serde(rename = "units")]
    Units { units: Vec<UnitInfo> },

    #[serde(rename = "unit_files")]
    UnitFiles { files: Vec<UnitFileInfo> },

    #[serde(rename = "properties")]
    Properties { props: UnitProperties },

    #[serde(rename = "property")]
    Property { value: serde_json::Value },

    #[serde(rename = "unit_file_changes")]
    UnitFileChanges { carries_install_info: bool, changes: Vec<(String, String, String)> },
}

impl OpResult {
    pub fn err(error: WireError) -> Self {
        OpResult::Err { error }
    }

    /// Split into `Result` for callers that only care about failure.
    pub fn into_result(self) -> Result<OpResult, WireError> {
        match self {
            OpResult::Err { error } => Err(error),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
