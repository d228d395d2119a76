// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Unit and job model types shared by controller and agent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Error parsing a wire state string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown state: {0}")]
pub struct ParseStateError(pub String);

/// Activation state of a unit, as reported by systemd.
///
/// `Invalid` is the controller-side placeholder for a unit that is not
/// currently loaded; it never originates from systemd itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveState {
    Active,
    Reloading,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    Invalid,
}

crate::string_enum! {
    ActiveState, ParseStateError {
        Active => "active",
        Reloading => "reloading",
        Inactive => "inactive",
        Failed => "failed",
        Activating => "activating",
        Deactivating => "deactivating",
        Invalid => "invalid",
    }
}

impl ActiveState {
    /// States that satisfy a proxy waiting for its target.
    pub fn is_active(self) -> bool {
        matches!(self, ActiveState::Active)
    }

    /// States that terminate a proxy's wait with a failure.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, ActiveState::Failed | ActiveState::Inactive)
    }
}

/// Why a lifecycle event was emitted.
///
/// `Real` events mirror a live systemd transition; `Virtual` events are
/// synthesized (late-subscribe snapshots, disconnect sweeps) and must be
/// tolerated anywhere a real event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventReason {
    Real,
    Virtual,
}

crate::string_enum! {
    EventReason, ParseStateError {
        Real => "real",
        Virtual => "virtual",
    }
}

/// Kind of unit lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Start,
    Stop,
    Restart,
    Reload,
}

crate::string_enum! {
    JobType, ParseStateError {
        Start => "start",
        Stop => "stop",
        Restart => "restart",
        Reload => "reload",
    }
}

/// Progress of a job through the agent's systemd queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Running,
    Done,
}

crate::string_enum! {
    JobState, ParseStateError {
        Waiting => "waiting",
        Running => "running",
        Done => "done",
    }
}

/// One row of a `ListUnits` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub load_state: String,
    pub active_state: ActiveState,
    #[serde(default)]
    pub sub_state: String,
}

/// One row of a `ListUnitFiles` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFileInfo {
    pub path: String,
    pub state: String,
}

/// Property bag forwarded verbatim between systemd and clients.
pub type UnitProperties = HashMap<String, serde_json::Value>;

#[cfg(test)]
#[path = "unit_tests.rs"]
mod tests;
