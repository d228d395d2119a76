// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Controller broadcast signals, delivered on `Listen` connections.

use herd_core::{JobId, JobState, JobType, NodeStatus, SystemStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControllerSignal {
    /// A job became visible on the controller.
    #[serde(rename = "job:new")]
    JobNew { id: JobId, path: String, node: String, unit: String },

    /// Terminal event for a job.
    #[serde(rename = "job:removed")]
    JobRemoved { id: JobId, path: String, node: String, unit: String, result: String },

    #[serde(rename = "job:state")]
    JobStateChanged { id: JobId, state: JobState },

    #[serde(rename = "node:status")]
    NodeStatusChanged { node: String, status: NodeStatus },

    /// Emitted only when the derived fleet status actually changes.
    #[serde(rename = "system:status")]
    SystemStatusChanged { status: SystemStatus },

    /// Relay of an agent's job timing measurement.
    #[serde(rename = "metrics:agent_job")]
    AgentJobMetrics { node: String, unit: String, method: JobType, elapsed_us: u64 },

    /// Controller-side elapsed time from job creation to completion.
    #[serde(rename = "metrics:controller_job")]
    StartUnitJobMetrics { node: String, job: JobId, elapsed_us: u64 },
}
