// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Wire protocol for herd daemon communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.
//! Every socket speaks the same framing; the first frame into the
//! controller is a [`Hello`] declaring the peer role.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod agent;
mod client;
mod codec;
mod controller;
mod errcode;
mod hello;
mod local;
mod monitor;
mod signal;

pub use agent::AgentMessage;
pub use client::{
    ClientReply, ClientRequest, NodeDetail, NodeEntry, NodeOp, NodeUnitFiles, NodeUnits,
};
pub use codec::{decode, encode, read_frame, read_frame_wait, write_frame, ProtocolError};
pub use controller::{AgentOp, ControllerMessage};
pub use errcode::{ErrCode, WireError};
pub use hello::Hello;
pub use local::{AgentStatusInfo, LocalReply, LocalRequest};
pub use monitor::{MonitorEvent, MonitorFrame, MonitorRequest};
pub use signal::ControllerSignal;

/// Result payload of one agent-side operation, shared by both reply
/// directions (agent op replies and the controller's Register reply).
pub use controller::OpResult;
