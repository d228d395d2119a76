// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Client API on the agent's local socket.

use crate::errcode::WireError;
use herd_core::ProxyId;
use serde::{Deserialize, Serialize};

/// Request from a local client (proxy helper, operator tooling) to the
/// agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LocalRequest {
    /// Declare that `local_service` depends on `unit` on `node`. The
    /// reply is held until the target's state is determined.
    #[serde(rename = "proxy:create")]
    CreateProxy { local_service: String, node: String, unit: String },

    /// Tear the relation down. Best-effort: succeeds even when the
    /// proxy is already gone.
    #[serde(rename = "proxy:remove")]
    RemoveProxy { local_service: String, node: String, unit: String },

    /// Connection-state diagnostics.
    #[serde(rename = "status")]
    Status,

    #[serde(rename = "log:level")]
    SetLogLevel { level: String },
}

/// Reply from the agent to a local client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LocalReply {
    #[serde(rename = "ok")]
    Ok,

    #[serde(rename = "error")]
    Error { error: WireError },

    /// The proxy target is ready.
    #[serde(rename = "proxy")]
    Proxy { id: ProxyId, path: String },

    #[serde(rename = "status")]
    Status { status: AgentStatusInfo },
}

/// Operator diagnostics for the agent's controller link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatusInfo {
    pub connected: bool,
    pub controller: String,
    /// Reconnect attempts since the link last dropped.
    pub retry_count: u32,
    /// Monotonic microseconds at which the link dropped, when offline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnect_us: Option<u64>,
}
