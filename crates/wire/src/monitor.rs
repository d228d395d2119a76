// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Monitor sub-protocol, spoken on an upgraded `CreateMonitor`
//! connection. Request replies and events interleave on the stream;
//! requests are answered in order.

use crate::errcode::WireError;
use herd_core::unit::UnitProperties;
use herd_core::{ActiveState, EventReason, PeerId, SubscriptionId};
use serde::{Deserialize, Serialize};

/// Client → controller on a monitor owner connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorRequest {
    /// Subscribe to one unit (or `*`) on one node (or `*`).
    #[serde(rename = "subscribe")]
    Subscribe { node: String, unit: String },

    /// Subscribe to a set of units on one node, as a single record.
    #[serde(rename = "subscribe:list")]
    SubscribeList { node: String, units: Vec<String> },

    /// Best-effort removal; unknown ids succeed.
    #[serde(rename = "unsubscribe")]
    Unsubscribe { id: SubscriptionId },

    /// Deliver this monitor's events to the named peer channel too.
    #[serde(rename = "peer:add")]
    AddPeer { name: String },

    #[serde(rename = "peer:remove")]
    RemovePeer { id: PeerId, reason: String },

    #[serde(rename = "close")]
    Close,
}

/// Controller → client on a monitor owner or peer connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorFrame {
    #[serde(rename = "subscribed")]
    Subscribed { id: SubscriptionId },

    #[serde(rename = "unsubscribed")]
    Unsubscribed,

    #[serde(rename = "peer:added")]
    PeerAdded { id: PeerId },

    /// Acknowledges `RemovePeer` on the owner stream; on the departing
    /// peer's stream it is the terminal frame.
    #[serde(rename = "peer:removed")]
    PeerRemoved { reason: String },

    #[serde(rename = "error")]
    Error { error: WireError },

    #[serde(rename = "closed")]
    Closed,

    #[serde(rename = "event")]
    Event { event: MonitorEvent },
}

/// One unit lifecycle event fanned out to a monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorEvent {
    #[serde(rename = "unit:new")]
    UnitNew { node: String, unit: String, reason: EventReason },

    #[serde(rename = "unit:removed")]
    UnitRemoved { node: String, unit: String, reason: EventReason },

    #[serde(rename = "unit:state")]
    UnitStateChanged {
        node: String,
        unit: String,
        active: ActiveState,
        sub: String,
        reason: EventReason,
    },

    #[serde(rename = "unit:properties")]
    UnitPropertiesChanged { node: String, unit: String, interface: String, props: UnitProperties },
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
