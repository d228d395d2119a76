// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use serde::{Deserialize, Serialize};

/// First frame on every connection into the controller, declaring the
/// peer role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Hello {
    /// Long-lived agent peer connection. Full-duplex
    /// `AgentMessage`/`ControllerMessage` streams follow.
    #[serde(rename = "hello:agent")]
    Agent {
        /// Shared token, compared against the per-name pin configured
        /// on the controller at Register time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Client API connection: one request, one reply, unless the
    /// request upgrades the connection to an event stream.
    #[serde(rename = "hello:client")]
    Client,
}
