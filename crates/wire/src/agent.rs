// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Agent → controller messages.

use crate::controller::OpResult;
use herd_core::unit::UnitProperties;
use herd_core::{ActiveState, EventReason, JobId, JobState, JobType, ProxyId};
use serde::{Deserialize, Serialize};

/// Message sent by an agent to the controller.
///
/// `Register` is the only agent-originated request; everything else is
/// either the answer to a controller request or a broadcast signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    /// Promote this anonymous connection to the named node.
    #[serde(rename = "register")]
    Register { serial: u64, name: String },

    /// Answer to a controller request.
    #[serde(rename = "reply")]
    Reply { serial: u64, result: OpResult },

    /// Liveness tick.
    #[serde(rename = "heartbeat")]
    Heartbeat,

    /// Terminal result for a lifecycle job.
    #[serde(rename = "job:done")]
    JobDone { job: JobId, result: String },

    /// Mid-lifecycle progress for a job.
    #[serde(rename = "job:state")]
    JobStateChanged { job: JobId, state: JobState },

    #[serde(rename = "unit:new")]
    UnitNew { unit: String, reason: EventReason },

    #[serde(rename = "unit:removed")]
    UnitRemoved { unit: String, reason: EventReason },

    #[serde(rename = "unit:state")]
    UnitStateChanged { unit: String, active: ActiveState, sub: String, reason: EventReason },

    #[serde(rename = "unit:properties")]
    UnitPropertiesChanged { unit: String, interface: String, props: UnitProperties },

    /// A local service declared a dependency on `unit` on `node`.
    #[serde(rename = "proxy:new")]
    ProxyNew { proxy: ProxyId, node: String, unit: String },

    #[serde(rename = "proxy:removed")]
    ProxyRemoved { proxy: ProxyId, node: String, unit: String },

    /// Elapsed time of one completed lifecycle job, agent-side.
    #[serde(rename = "metrics:job")]
    AgentJobMetrics { unit: String, method: JobType, elapsed_us: u64 },
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
