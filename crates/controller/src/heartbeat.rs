// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Node liveness scan.
//!
//! Agents emit `Heartbeat` and every inbound message refreshes
//! `last_seen`; this task forcibly disconnects nodes that stay silent
//! past the threshold. A threshold of zero disables the check.

use crate::state::Ctx;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub fn spawn(ctx: Ctx) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ctx.config.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            scan(&ctx);
        }
    })
}

/// One scan pass. Cancelling the link wakes the node's reader task,
/// which runs the normal disconnect sweep.
pub fn scan(ctx: &Ctx) {
    let threshold = ctx.config.heartbeat_threshold;
    if threshold.is_zero() {
        return;
    }
    let threshold_us = threshold.as_micros() as u64;
    let now = ctx.clock.monotonic_us();

    let stale: Vec<(String, CancellationToken)> = ctx.lock_state(|st| {
        st.nodes
            .values()
            .filter_map(|node| {
                let link = node.link.as_ref()?;
                (now.saturating_sub(node.last_seen_us) > threshold_us)
                    .then(|| (node.name.clone(), link.cancel.clone()))
            })
            .collect()
    });

    for (name, cancel) in stale {
        warn!(node = %name, "heartbeat threshold exceeded, disconnecting");
        cancel.cancel();
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
