// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Node registry and per-agent connection state.
//!
//! A connection is *anonymous* from accept until a successful
//! `Register`, which migrates its link into the named node record.
//! Disconnect at any moment sweeps outstanding requests, jobs,
//! subscriptions, and proxy monitors.

use crate::state::Ctx;
use crate::{job, monitor, proxy};
use herd_core::{is_valid_node_name, is_valid_unit_name, ActiveState, JobId, JobType, NodeStatus, SubscriptionId};
use herd_wire::{
    AgentMessage, AgentOp, ControllerMessage, ControllerSignal, ErrCode, NodeDetail, NodeEntry,
    NodeOp, NodeUnitFiles, NodeUnits, OpResult, WireError,
};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// systemd job modes the controller forwards without complaint.
const VALID_JOB_MODES: &[&str] =
    &["replace", "fail", "isolate", "ignore-dependencies", "ignore-requirements"];

/// Per-unit subscription bookkeeping on one node.
///
/// Exists iff at least one subscription refers to this unit; the cached
/// state feeds virtual snapshots for late subscribers.
#[derive(Debug)]
pub struct UnitSub {
    pub loaded: bool,
    pub active: ActiveState,
    pub sub_state: String,
    pub subs: Vec<SubscriptionId>,
}

impl UnitSub {
    pub fn new() -> Self {
        Self {
            loaded: false,
            active: ActiveState::Invalid,
            sub_state: String::new(),
            subs: Vec::new(),
        }
    }
}

impl Default for UnitSub {
    fn default() -> Self {
        Self::new()
    }
}

/// The live connection half of a node: outbound channel plus pending
/// request table.
pub struct Link {
    pub conn_id: u64,
    pub tx: mpsc::UnboundedSender<ControllerMessage>,
    pub cancel: CancellationToken,
    serial_seq: u64,
    pending: HashMap<u64, oneshot::Sender<OpResult>>,
}

impl Link {
    pub fn new(
        conn_id: u64,
        tx: mpsc::UnboundedSender<ControllerMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self { conn_id, tx, cancel, serial_seq: 0, pending: HashMap::new() }
    }

    pub fn send(&self, msg: ControllerMessage) {
        let _ = self.tx.send(msg);
    }

    /// Issue a request and return its serial plus the reply slot.
    pub fn request(&mut self, op: AgentOp) -> (u64, oneshot::Receiver<OpResult>) {
        self.serial_seq += 1;
        let serial = self.serial_seq;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(serial, tx);
        let _ = self.tx.send(ControllerMessage::Request { serial, op });
        (serial, rx)
    }

    /// Issue a request nobody waits on (EnableMetrics, Subscribe
    /// refreshes, dep units). The eventual reply resolves to nothing.
    pub fn notify(&mut self, op: AgentOp) {
        self.serial_seq += 1;
        let _ = self.tx.send(ControllerMessage::Request { serial: self.serial_seq, op });
    }

    /// Route an inbound reply. A request already abandoned (timeout,
    /// cancellation) has no entry and the late reply is dropped.
    pub fn resolve(&mut self, serial: u64, result: OpResult) {
        if let Some(tx) = self.pending.remove(&serial) {
            let _ = tx.send(result);
        }
    }

    /// Abandon one pending request; its late reply will be dropped.
    pub fn forget(&mut self, serial: u64) {
        self.pending.remove(&serial);
    }

    /// Cancel every outstanding request with a synthesized error so
    /// each original caller receives a terminal reply.
    pub fn cancel_all(&mut self) {
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(OpResult::err(WireError::cancelled()));
        }
    }
}

/// An accepted connection that has not registered yet.
pub struct AnonymousPeer {
    pub conn_id: u64,
    pub tx: mpsc::UnboundedSender<ControllerMessage>,
    pub cancel: CancellationToken,
    pub peer_ip: String,
}

/// Controller-side record of one named node.
pub struct Node {
    pub name: String,
    pub link: Option<Link>,
    pub peer_ip: String,
    pub last_seen_us: u64,
    pub shutdown: bool,
    pub units: HashMap<String, UnitSub>,
    /// Dependency refcounts for proxies targeting this node.
    pub deps: HashMap<String, u32>,
    pub required_token: Option<String>,
}

impl Node {
    pub fn provisioned(name: String, required_token: Option<String>) -> Self {
        Self {
            name,
            link: None,
            peer_ip: String::new(),
            last_seen_us: 0,
            shutdown: false,
            units: HashMap::new(),
            deps: HashMap::new(),
            required_token,
        }
    }

    pub fn is_online(&self) -> bool {
        self.link.is_some()
    }

    pub fn status(&self) -> NodeStatus {
        if self.is_online() {
            NodeStatus::Online
        } else {
            NodeStatus::Offline
        }
    }

    pub fn path(name: &str) -> String {
        format!("/herd/node/{name}")
    }

    pub fn entry(&self) -> NodeEntry {
        NodeEntry {
            name: self.name.clone(),
            path: Node::path(&self.name),
            status: self.status(),
            peer_ip: self.peer_ip.clone(),
        }
    }

    pub fn detail(&self) -> NodeDetail {
        NodeDetail {
            name: self.name.clone(),
            path: Node::path(&self.name),
            status: self.status(),
            peer_ip: self.peer_ip.clone(),
            last_seen_us: self.is_online().then_some(self.last_seen_us),
        }
    }
}

/// Record a freshly accepted agent connection.
pub fn add_anonymous(ctx: &Ctx, peer: AnonymousPeer) {
    ctx.lock_state_mut(|st| {
        st.anonymous.insert(peer.conn_id, peer);
    });
}

/// Drop an anonymous record whose connection went away.
pub fn remove_anonymous(ctx: &Ctx, conn_id: u64) {
    ctx.lock_state_mut(|st| {
        st.anonymous.remove(&conn_id);
    });
}

/// The Register protocol.
///
/// On success the anonymous record is consumed, its link migrated into
/// the named node, and the register reply queued ahead of any
/// re-subscribe traffic so the agent always sees the verdict first.
/// On failure the anonymous record stays valid for another attempt.
pub fn register(
    ctx: &Ctx,
    conn_id: u64,
    name: &str,
    token: Option<&str>,
    serial: u64,
) -> Result<(), WireError> {
    let now = ctx.clock.monotonic_us();
    let mut guard = ctx.state.lock();
    let st = &mut *guard;

    if !is_valid_node_name(name) {
        return Err(WireError::invalid_args(format!("invalid node name: {name}")));
    }
    if !ctx.config.name_allowed(name) {
        return Err(WireError::new(ErrCode::ServiceUnknown, "Unexpected node name"));
    }
    if st.nodes.get(name).is_some_and(Node::is_online) {
        return Err(WireError::new(ErrCode::AddressInUse, "The node is already connected"));
    }
    if !st.anonymous.contains_key(&conn_id) {
        return Err(WireError::new(ErrCode::AddressInUse, "Can't register twice"));
    }

    let required_token = match st.nodes.get(name) {
        Some(node) => node.required_token.clone(),
        None => ctx
            .config
            .node_policies
            .get(name)
            .and_then(|p| p.required_token.clone()),
    };
    if let Some(required) = required_token.as_deref() {
        if token != Some(required) {
            return Err(WireError::failed("Unexpected peer credentials"));
        }
    }

    // Checks passed: consume the anonymous record and promote.
    let Some(peer) = st.anonymous.remove(&conn_id) else {
        return Err(WireError::new(ErrCode::AddressInUse, "Can't register twice"));
    };
    let node = st
        .nodes
        .entry(name.to_string())
        .or_insert_with(|| Node::provisioned(name.to_string(), required_token));
    node.link = Some(Link::new(peer.conn_id, peer.tx, peer.cancel));
    node.peer_ip = peer.peer_ip;
    node.last_seen_us = now;
    node.shutdown = false;

    // Re-establish agent-side interest and dependency units, after the
    // register verdict so the agent never sees a request first.
    if let Some(link) = node.link.as_mut() {
        link.send(ControllerMessage::Reply { serial, result: OpResult::Ok });
        let units: Vec<String> = node.units.keys().cloned().collect();
        for unit in units {
            link.notify(AgentOp::Subscribe { unit });
        }
        let deps: Vec<String> = node.deps.keys().cloned().collect();
        for unit in deps {
            link.notify(AgentOp::StartDep { unit });
        }
    }

    monitor::attach_node_on_register(st, name);

    if st.metrics_enabled {
        if let Some(link) = st.nodes.get_mut(name).and_then(|n| n.link.as_mut()) {
            link.notify(AgentOp::EnableMetrics);
        }
    }

    info!(node = name, "node registered");
    st.broadcast(ControllerSignal::NodeStatusChanged {
        node: name.to_string(),
        status: NodeStatus::Online,
    });
    st.refresh_system_status();
    Ok(())
}

/// Disconnect sweep for a named node.
///
/// No-op when `conn_id` is stale, i.e. a reconnect already took over
/// the name.
pub fn disconnect(ctx: &Ctx, name: &str, conn_id: u64) {
    let mut guard = ctx.state.lock();
    let st = &mut *guard;

    let current = st
        .nodes
        .get(name)
        .and_then(|n| n.link.as_ref())
        .map(|l| l.conn_id == conn_id)
        .unwrap_or(false);
    if !current {
        return;
    }
    if let Some(mut link) = st.nodes.get_mut(name).and_then(|n| n.link.take()) {
        link.cancel_all();
        link.cancel.cancel();
    }

    info!(node = name, "node disconnected");

    // Order matters: the unit sweep delivers virtual events through
    // proxy subscriptions before the origin-side monitors are torn
    // down, and jobs are cancelled after their node is offline.
    monitor::node_offline_sweep(st, name);
    proxy::origin_offline_sweep(st, name);
    job::node_jobs_sweep(st, name);

    st.broadcast(ControllerSignal::NodeStatusChanged {
        node: name.to_string(),
        status: NodeStatus::Offline,
    });
    st.refresh_system_status();
}

/// Route one inbound message from a registered agent.
pub fn handle_agent_message(ctx: &Ctx, name: &str, msg: AgentMessage) {
    let now = ctx.clock.monotonic_us();
    let mut guard = ctx.state.lock();
    let st = &mut *guard;

    if let Some(node) = st.nodes.get_mut(name) {
        node.last_seen_us = now;
    }

    match msg {
        AgentMessage::Register { .. } => {
            debug!(node = name, "ignoring Register from a named node");
        }
        AgentMessage::Reply { serial, result } => {
            if let Some(link) = st.nodes.get_mut(name).and_then(|n| n.link.as_mut()) {
                link.resolve(serial, result);
            }
        }
        AgentMessage::Heartbeat => {
            debug!(node = name, "heartbeat");
        }
        AgentMessage::JobDone { job, result } => {
            job::handle_job_done(st, job, &result, now);
        }
        AgentMessage::JobStateChanged { job, state } => {
            job::handle_job_state_changed(st, job, state);
        }
        AgentMessage::UnitNew { unit, reason } => {
            monitor::handle_unit_new(st, name, &unit, reason);
        }
        AgentMessage::UnitRemoved { unit, reason } => {
            monitor::handle_unit_removed(st, name, &unit, reason);
        }
        AgentMessage::UnitStateChanged { unit, active, sub, reason } => {
            monitor::handle_unit_state_changed(st, name, &unit, active, &sub, reason);
        }
        AgentMessage::UnitPropertiesChanged { unit, interface, props } => {
            monitor::handle_unit_properties_changed(st, name, &unit, &interface, props);
        }
        AgentMessage::ProxyNew { proxy, node: target, unit } => {
            proxy::handle_proxy_new(st, name, proxy, &target, &unit);
        }
        AgentMessage::ProxyRemoved { proxy, node: target, unit } => {
            proxy::handle_proxy_removed(st, name, proxy, &target, &unit);
        }
        AgentMessage::AgentJobMetrics { unit, method, elapsed_us } => {
            if st.metrics_enabled {
                st.broadcast(ControllerSignal::AgentJobMetrics {
                    node: name.to_string(),
                    unit,
                    method,
                    elapsed_us,
                });
            }
        }
    }
}

/// One controller→agent request with timeout and tombstone semantics:
/// an abandoned request drops its late reply.
pub async fn call(ctx: &Ctx, name: &str, op: AgentOp) -> Result<OpResult, WireError> {
    let (serial, rx) = {
        let mut guard = ctx.state.lock();
        let node = guard.nodes.get_mut(name).ok_or_else(|| {
            WireError::new(ErrCode::ServiceUnknown, format!("node {name} not found"))
        })?;
        if node.shutdown {
            return Err(WireError::shutdown());
        }
        let link = node
            .link
            .as_mut()
            .ok_or_else(|| WireError::failed(format!("node {name} is offline")))?;
        link.request(op)
    };

    match tokio::time::timeout(ctx.config.request_timeout, rx).await {
        Ok(Ok(OpResult::Err { error })) => Err(error),
        Ok(Ok(result)) => Ok(result),
        Ok(Err(_)) => Err(WireError::cancelled()),
        Err(_) => {
            let mut guard = ctx.state.lock();
            if let Some(link) = guard.nodes.get_mut(name).and_then(|n| n.link.as_mut()) {
                link.forget(serial);
            }
            Err(WireError::failed(format!("request to {name} timed out")))
        }
    }
}

/// Client-facing lifecycle op: create the job, send the agent method,
/// and publish the job only after the agent accepted it. An agent
/// error is forwarded verbatim and the job id is never published.
pub async fn lifecycle(
    ctx: &Ctx,
    name: &str,
    ty: JobType,
    unit: &str,
    mode: &str,
) -> Result<(JobId, String), WireError> {
    if !is_valid_unit_name(unit) {
        return Err(WireError::invalid_args(format!("invalid unit name: {unit}")));
    }
    if !VALID_JOB_MODES.contains(&mode) {
        return Err(WireError::invalid_args(format!("invalid job mode: {mode}")));
    }

    let id = ctx.lock_state_mut(|st| JobId::new(st.job_seq.next()));
    let op = {
        let unit = unit.to_string();
        let mode = mode.to_string();
        match ty {
            JobType::Start => AgentOp::StartUnit { unit, mode, job: id },
            JobType::Stop => AgentOp::StopUnit { unit, mode, job: id },
            JobType::Restart => AgentOp::RestartUnit { unit, mode, job: id },
            JobType::Reload => AgentOp::ReloadUnit { unit, mode, job: id },
        }
    };

    call(ctx, name, op).await?;

    let start_us = ctx.clock.monotonic_us();
    let path = ctx.lock_state_mut(|st| {
        job::register_job(st, job::Job::new(id, name.to_string(), unit.to_string(), ty, start_us))
    });
    Ok((id, path))
}

/// Forward a pass-through op to the node's agent and translate the
/// reply. Lifecycle ops are rejected here; they go through
/// [`lifecycle`].
pub async fn pass_through(ctx: &Ctx, name: &str, op: NodeOp) -> Result<OpResult, WireError> {
    let op = translate_op(op)?;
    call(ctx, name, op).await
}

fn require_unit_name(unit: &str) -> Result<String, WireError> {
    if is_valid_unit_name(unit) {
        Ok(unit.to_string())
    } else {
        Err(WireError::invalid_args(format!("invalid unit name: {unit}")))
    }
}

/// Map a client NodeOp onto the agent wire op, validating arguments.
fn translate_op(op: NodeOp) -> Result<AgentOp, WireError> {
    match op {
        NodeOp::StartUnit { .. }
        | NodeOp::StopUnit { .. }
        | NodeOp::RestartUnit { .. }
        | NodeOp::ReloadUnit { .. } => {
            Err(WireError::invalid_args("lifecycle ops create jobs; use the job path"))
        }
        NodeOp::ListUnits => Ok(AgentOp::ListUnits),
        NodeOp::ListUnitFiles => Ok(AgentOp::ListUnitFiles),
        NodeOp::GetUnitProperties { unit, interface } => {
            Ok(AgentOp::GetUnitProperties { unit: require_unit_name(&unit)?, interface })
        }
        NodeOp::GetUnitProperty { unit, interface, property } => Ok(AgentOp::GetUnitProperty {
            unit: require_unit_name(&unit)?,
            interface,
            property,
        }),
        NodeOp::SetUnitProperties { unit, runtime, props } => Ok(AgentOp::SetUnitProperties {
            unit: require_unit_name(&unit)?,
            runtime,
            props,
        }),
        NodeOp::FreezeUnit { unit } => Ok(AgentOp::FreezeUnit { unit: require_unit_name(&unit)? }),
        NodeOp::ThawUnit { unit } => Ok(AgentOp::ThawUnit { unit: require_unit_name(&unit)? }),
        NodeOp::KillUnit { unit, whom, signal } => {
            Ok(AgentOp::KillUnit { unit: require_unit_name(&unit)?, whom, signal })
        }
        NodeOp::ResetFailed { unit } => {
            let unit = match unit {
                Some(unit) => Some(require_unit_name(&unit)?),
                None => None,
            };
            Ok(AgentOp::ResetFailed { unit })
        }
        NodeOp::EnableUnitFiles { files, runtime, force } => {
            Ok(AgentOp::EnableUnitFiles { files, runtime, force })
        }
        NodeOp::DisableUnitFiles { files, runtime } => {
            Ok(AgentOp::DisableUnitFiles { files, runtime })
        }
        NodeOp::Reload => Ok(AgentOp::Reload),
        NodeOp::SetLogLevel { level } => {
            let level = level
                .parse()
                .map_err(|_| WireError::invalid_args(format!("invalid log level: {level}")))?;
            Ok(AgentOp::SetLogLevel { level })
        }
    }
}

/// Fan out `ListUnits` to every named node. Per-node failures are
/// carried in the reply; the fan-out itself never fails.
pub async fn fleet_list_units(ctx: &Ctx) -> Vec<NodeUnits> {
    let names: Vec<String> = ctx.lock_state(|st| st.nodes.keys().cloned().collect());
    let calls = names.iter().map(|name| call(ctx, name, AgentOp::ListUnits));
    let results = futures_util::future::join_all(calls).await;
    names
        .into_iter()
        .zip(results)
        .map(|(node, result)| match result {
            Ok(OpResult::Units { units }) => NodeUnits { node, units: Some(units), error: None },
            Ok(other) => {
                warn!(node = %node, "unexpected ListUnits reply: {:?}", other);
                NodeUnits {
                    node,
                    units: None,
                    error: Some(WireError::failed("unexpected reply")),
                }
            }
            Err(error) => NodeUnits { node, units: None, error: Some(error) },
        })
        .collect()
}

/// Fan out `ListUnitFiles` to every named node.
pub async fn fleet_list_unit_files(ctx: &Ctx) -> Vec<NodeUnitFiles> {
    let names: Vec<String> = ctx.lock_state(|st| st.nodes.keys().cloned().collect());
    let calls = names.iter().map(|name| call(ctx, name, AgentOp::ListUnitFiles));
    let results = futures_util::future::join_all(calls).await;
    names
        .into_iter()
        .zip(results)
        .map(|(node, result)| match result {
            Ok(OpResult::UnitFiles { files }) => {
                NodeUnitFiles { node, files: Some(files), error: None }
            }
            Ok(other) => {
                warn!(node = %node, "unexpected ListUnitFiles reply: {:?}", other);
                NodeUnitFiles {
                    node,
                    files: None,
                    error: Some(WireError::failed("unexpected reply")),
                }
            }
            Err(error) => NodeUnitFiles { node, files: None, error: Some(error) },
        })
        .collect()
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
