// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Client API on the controller socket.

use crate::errcode::WireError;
use herd_core::unit::UnitProperties;
use herd_core::{JobId, MonitorId, NodeStatus, SystemStatus, UnitFileInfo, UnitInfo};
use serde::{Deserialize, Serialize};

/// Request from a client to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// List every named node with its status.
    #[serde(rename = "node:list")]
    ListNodes,

    /// Resolve one node to its exported path and properties.
    #[serde(rename = "node:get")]
    GetNode { name: String },

    /// Fan-out `ListUnits` to every named node.
    #[serde(rename = "fleet:units")]
    ListUnits,

    /// Fan-out `ListUnitFiles` to every named node.
    #[serde(rename = "fleet:unit_files")]
    ListUnitFiles,

    /// Fleet status summary.
    #[serde(rename = "status")]
    Status,

    /// Operation addressed at one named node.
    #[serde(rename = "node:op")]
    Node { name: String, op: NodeOp },

    /// Cancel a pending job.
    #[serde(rename = "job:cancel")]
    CancelJob { id: JobId },

    /// Upgrade this connection to a monitor owner stream.
    #[serde(rename = "monitor:create")]
    CreateMonitor,

    /// Upgrade this connection to a monitor peer stream for `peer`.
    #[serde(rename = "monitor:listen")]
    MonitorListen { peer: String },

    /// Upgrade this connection to a controller signal stream.
    #[serde(rename = "listen")]
    Listen,

    /// Adjust the controller's own log level.
    #[serde(rename = "log:level")]
    SetLogLevel { level: String },

    #[serde(rename = "metrics:enable")]
    EnableMetrics,

    #[serde(rename = "metrics:disable")]
    DisableMetrics,

    /// Request controller shutdown.
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Per-node operation, delegated to the node's agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum NodeOp {
    #[serde(rename = "unit:start")]
    StartUnit { unit: String, mode: String },

    #[serde(rename = "unit:stop")]
    StopUnit { unit: String, mode: String },

    #[serde(rename = "unit:restart")]
    RestartUnit { unit: String, mode: String },

    #[serde(rename = "unit:reload")]
    ReloadUnit { unit: String, mode: String },

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

    #[serde(rename = "unit:reset_failed")]
    ResetFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },

    #[serde(rename = "unit_files:enable")]
    EnableUnitFiles { files: Vec<String>, runtime: bool, force: bool },

    #[serde(rename = "unit_files:disable")]
    DisableUnitFiles { files: Vec<String>, runtime: bool },

    #[serde(rename = "daemon:reload")]
    Reload,

    #[serde(rename = "log:level")]
    SetLogLevel { level: String },
}

/// One named node as listed by `ListNodes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    pub path: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub peer_ip: String,
}

/// Full node properties returned by `GetNode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDetail {
    pub name: String,
    pub path: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub peer_ip: String,
    /// Monotonic microseconds of the last inbound message, when online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_us: Option<u64>,
}

/// Per-node slice of a fleet `ListUnits` fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUnits {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Vec<UnitInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Per-node slice of a fleet `ListUnitFiles` fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUnitFiles {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<UnitFileInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Reply from the controller to a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientReply {
    #[serde(rename = "ok")]
    Ok,

    #[serde(rename = "error")]
    Error { error: WireError },

    #[serde(rename = "nodes")]
    Nodes { nodes: Vec<NodeEntry> },

    #[serde(rename = "node")]
    Node { node: NodeDetail },

    #[serde(rename = "fleet:units")]
    FleetUnits { nodes: Vec<NodeUnits> },

    #[serde(rename = "fleet:unit_files")]
    FleetUnitFiles { nodes: Vec<NodeUnitFiles> },

    #[serde(rename = "status")]
    Status { status: SystemStatus, nodes: Vec<NodeEntry> },

    /// Lifecycle op accepted: the created job.
    #[serde(rename = "job")]
    Job { id: JobId, path: String },

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

    /// First frame after a `CreateMonitor` upgrade.
    #[serde(rename = "monitor")]
    Monitor { id: MonitorId, path: String },

    /// First frame after a `Listen` or `MonitorListen` upgrade.
    #[serde(rename = "listening")]
    Listening,

    #[serde(rename = "shutting_down")]
    ShuttingDown,
}

impl ClientReply {
    pub fn err(error: WireError) -> Self {
        ClientReply::Error { error }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
