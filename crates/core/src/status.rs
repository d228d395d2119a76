// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Node and fleet status.

use crate::unit::ParseStateError;
use serde::{Deserialize, Serialize};

/// Connection status of a named node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

crate::string_enum! {
    NodeStatus, ParseStateError {
        Online => "online",
        Offline => "offline",
    }
}

/// Fleet-wide status derived from `online_count` vs `total_count`.
///
/// The status only changes when the online count crosses the 0↔1 or
/// N-1↔N boundaries, so emitting a signal on every status *change* is
/// already chatter-free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    #[default]
    Down,
    Degraded,
    Up,
}

crate::string_enum! {
    SystemStatus, ParseStateError {
        Down => "down",
        Degraded => "degraded",
        Up => "up",
    }
}

impl SystemStatus {
    pub fn from_counts(online: usize, total: usize) -> Self {
        if online == 0 {
            SystemStatus::Down
        } else if online == total {
            SystemStatus::Up
        } else {
            SystemStatus::Degraded
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
