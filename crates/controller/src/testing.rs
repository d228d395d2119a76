// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Shared fixtures for controller unit tests.

use crate::config::Config;
use crate::node::{self, AnonymousPeer};
use crate::state::Ctx;
use herd_core::FakeClock;
use herd_wire::{ControllerMessage, ControllerSignal, MonitorFrame};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Context with a fake clock and no allow-list.
pub fn test_ctx() -> (Ctx, FakeClock) {
    test_ctx_with(Config::default())
}

pub fn test_ctx_with(config: Config) -> (Ctx, FakeClock) {
    let clock = FakeClock::new();
    let ctx = Ctx::new(config, Arc::new(clock.clone()));
    (ctx, clock)
}

pub fn config_with_allowed(names: &[&str]) -> Config {
    Config {
        allowed_node_names: Some(names.iter().map(|s| s.to_string()).collect()),
        ..Config::default()
    }
}

/// Register an agent connection for `name`, returning its conn id and
/// the outbound message stream the "agent" would see. The register
/// reply frame is consumed.
pub fn connect_agent(
    ctx: &Ctx,
    name: &str,
) -> (u64, mpsc::UnboundedReceiver<ControllerMessage>) {
    let (conn_id, mut rx) = connect_anonymous(ctx);
    node::register(ctx, conn_id, name, None, 0).unwrap();
    let reply = rx.try_recv().unwrap();
    assert!(matches!(reply, ControllerMessage::Reply { .. }));
    (conn_id, rx)
}

/// Accept an agent connection without registering it.
pub fn connect_anonymous(ctx: &Ctx) -> (u64, mpsc::UnboundedReceiver<ControllerMessage>) {
    let conn_id = ctx.lock_state_mut(|st| st.next_conn_id());
    let (tx, rx) = mpsc::unbounded_channel();
    node::add_anonymous(
        ctx,
        AnonymousPeer {
            conn_id,
            tx,
            cancel: CancellationToken::new(),
            peer_ip: "10.0.0.1".to_string(),
        },
    );
    (conn_id, rx)
}

/// Drain everything currently queued on an outbound channel.
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// Attach a broadcast-signal listener.
pub fn attach_listener(ctx: &Ctx) -> mpsc::UnboundedReceiver<ControllerSignal> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.lock_state_mut(|st| st.add_listener(tx));
    rx
}

/// Create a monitor owned by a test channel.
pub fn attach_monitor(
    ctx: &Ctx,
) -> (herd_core::MonitorId, mpsc::UnboundedReceiver<MonitorFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (id, _path) = ctx.lock_state_mut(|st| crate::monitor::create_monitor(st, tx));
    (id, rx)
}

/// Extract only the monitor events from a drained frame list.
pub fn events_of(frames: Vec<MonitorFrame>) -> Vec<herd_wire::MonitorEvent> {
    frames
        .into_iter()
        .filter_map(|f| match f {
            MonitorFrame::Event { event } => Some(event),
            _ => None,
        })
        .collect()
}
