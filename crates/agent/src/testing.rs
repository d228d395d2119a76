// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Shared fixtures for agent unit tests.

use crate::config::AgentConfig;
use crate::core::{AgentCtx, LinkState};
use crate::systemd::FakeSystemd;
use herd_core::FakeClock;
use herd_wire::AgentMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn test_ctx() -> (AgentCtx, FakeSystemd, FakeClock) {
    let clock = FakeClock::new();
    let systemd = FakeSystemd::new();
    let config = AgentConfig { node_name: "n1".to_string(), ..AgentConfig::default() };
    let ctx = AgentCtx::new(config, Arc::new(clock.clone()), Arc::new(systemd.clone()));
    (ctx, systemd, clock)
}

/// Mark the link connected and return the stream of messages the
/// controller would see.
pub fn connect_link(ctx: &AgentCtx) -> mpsc::UnboundedReceiver<AgentMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.lock_state_mut(|st| {
        st.link = LinkState::Connected {
            tx,
            cancel: tokio_util::sync::CancellationToken::new(),
        }
    });
    rx
}

/// Drain everything currently queued on an outbound channel.
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}
