// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Agent singleton state and operation execution.
//!
//! The unit-info cache is keyed by systemd object path; records live as
//! long as they are subscribed or loaded. The job table correlates
//! queued systemd jobs back to controller job ids.

use crate::config::AgentConfig;
use crate::logging::LogHandle;
use crate::proxy::{self, ProxyService};
use crate::systemd::{unit_object_path, SystemdError, SystemdEvent, SystemdManager};
use herd_core::{
    is_valid_unit_name, ActiveState, Clock, EventReason, JobId, JobType, ProxyId, Seq, WILDCARD,
};
use herd_wire::{
    AgentMessage, AgentOp, AgentStatusInfo, ControllerMessage, ErrCode, OpResult, WireError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One cached unit, keyed by its systemd object path.
#[derive(Debug, Clone)]
pub struct CachedUnit {
    pub object_path: String,
    pub name: String,
    pub subscribed: bool,
    pub loaded: bool,
    pub active: ActiveState,
    pub sub_state: String,
}

impl CachedUnit {
    fn new(name: String, object_path: String) -> Self {
        Self {
            object_path,
            name,
            subscribed: false,
            loaded: false,
            active: ActiveState::Invalid,
            sub_state: String::new(),
        }
    }
}

/// A systemd job we queued on the controller's behalf.
#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub job: JobId,
    pub method: JobType,
    pub unit: String,
    pub start_us: u64,
}

/// Controller link state machine.
pub enum LinkState {
    Disconnected,
    Connected {
        tx: mpsc::UnboundedSender<AgentMessage>,
        /// Cancels the session tasks, severing the connection.
        cancel: CancellationToken,
    },
    Retry { retry_count: u32, disconnect_us: u64 },
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected { .. })
    }

    /// Force the link down; the session cleanup marks retry state.
    pub fn sever(&self) {
        if let LinkState::Connected { cancel, .. } = self {
            cancel.cancel();
        }
    }
}

/// All agent registries, guarded by the [`AgentCtx`] mutex.
pub struct AgentState {
    pub units: HashMap<String, CachedUnit>,
    pub wildcard_subscribed: bool,
    pub jobs: HashMap<String, TrackedJob>,
    pub proxies: HashMap<ProxyId, ProxyService>,
    pub link: LinkState,
    pub metrics_enabled: bool,
    pub proxy_seq: Seq,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            units: HashMap::new(),
            wildcard_subscribed: false,
            jobs: HashMap::new(),
            proxies: HashMap::new(),
            link: LinkState::Disconnected,
            metrics_enabled: false,
            proxy_seq: Seq::new(),
        }
    }
}

impl AgentState {
    /// Queue a message for the controller; false when offline.
    pub fn send(&self, msg: AgentMessage) -> bool {
        match &self.link {
            LinkState::Connected { tx, .. } => tx.send(msg).is_ok(),
            _ => false,
        }
    }

    pub fn ensure_unit(&mut self, name: &str) -> &mut CachedUnit {
        let path = unit_object_path(name);
        self.units
            .entry(path.clone())
            .or_insert_with(|| CachedUnit::new(name.to_string(), path))
    }

    pub fn unit_by_name(&self, name: &str) -> Option<&CachedUnit> {
        self.units.get(&unit_object_path(name))
    }

    /// Drop records that are neither subscribed nor loaded.
    pub fn gc_units(&mut self) {
        self.units.retain(|_, u| u.subscribed || u.loaded);
    }
}

/// Shared daemon context handed to every task.
#[derive(Clone)]
pub struct AgentCtx {
    pub state: Arc<Mutex<AgentState>>,
    pub config: Arc<AgentConfig>,
    pub clock: Arc<dyn Clock>,
    pub systemd: Arc<dyn SystemdManager>,
    pub shutdown: Arc<Notify>,
    pub log: Option<LogHandle>,
}

impl AgentCtx {
    pub fn new(
        config: AgentConfig,
        clock: Arc<dyn Clock>,
        systemd: Arc<dyn SystemdManager>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(AgentState::default())),
            config: Arc::new(config),
            clock,
            systemd,
            shutdown: Arc::new(Notify::new()),
            log: None,
        }
    }

    pub fn lock_state<T>(&self, f: impl FnOnce(&AgentState) -> T) -> T {
        let guard = self.state.lock();
        f(&guard)
    }

    pub fn lock_state_mut<T>(&self, f: impl FnOnce(&mut AgentState) -> T) -> T {
        let mut guard = self.state.lock();
        f(&mut guard)
    }

    /// Where the controller lives, for diagnostics.
    pub fn controller_address(&self) -> String {
        match &self.config.controller_socket {
            Some(path) => path.display().to_string(),
            None => format!("{}:{}", self.config.controller_host, self.config.controller_port),
        }
    }
}

/// Diagnostics for the local `Status` request.
pub fn status_info(ctx: &AgentCtx) -> AgentStatusInfo {
    ctx.lock_state(|st| {
        let (connected, retry_count, disconnect_us) = match &st.link {
            LinkState::Connected { .. } => (true, 0, None),
            LinkState::Retry { retry_count, disconnect_us } => {
                (false, *retry_count, Some(*disconnect_us))
            }
            LinkState::Disconnected => (false, 0, None),
        };
        AgentStatusInfo {
            connected,
            controller: ctx.controller_address(),
            retry_count,
            disconnect_us,
        }
    })
}

/// Route one inbound controller message.
pub async fn handle_controller_message(ctx: &AgentCtx, msg: ControllerMessage) {
    match msg {
        ControllerMessage::Request { serial, op } => {
            let result = execute_op(ctx, op).await;
            ctx.lock_state(|st| st.send(AgentMessage::Reply { serial, result }));
        }
        ControllerMessage::Reply { serial, .. } => {
            debug!(serial, "stray reply outside registration");
        }
        ControllerMessage::ProxyTargetNew { proxy } => proxy::handle_target_new(ctx, proxy),
        ControllerMessage::ProxyTargetStateChanged { proxy, active, sub, reason } => {
            proxy::handle_target_state_changed(ctx, proxy, active, &sub, reason);
        }
        ControllerMessage::ProxyTargetRemoved { proxy, reason } => {
            proxy::handle_target_removed(ctx, proxy, reason);
        }
        ControllerMessage::ProxyError { proxy, message } => {
            proxy::handle_proxy_error(ctx, proxy, &message);
        }
    }
}

/// Execute one controller-requested operation against systemd.
pub async fn execute_op(ctx: &AgentCtx, op: AgentOp) -> OpResult {
    match op {
        AgentOp::StartUnit { unit, mode, job } => {
            lifecycle_op(ctx, JobType::Start, unit, mode, job).await
        }
        AgentOp::StopUnit { unit, mode, job } => {
            lifecycle_op(ctx, JobType::Stop, unit, mode, job).await
        }
        AgentOp::RestartUnit { unit, mode, job } => {
            lifecycle_op(ctx, JobType::Restart, unit, mode, job).await
        }
        AgentOp::ReloadUnit { unit, mode, job } => {
            lifecycle_op(ctx, JobType::Reload, unit, mode, job).await
        }

        AgentOp::CancelJob { job } => {
            let path = ctx.lock_state(|st| {
                st.jobs.iter().find(|(_, t)| t.job == job).map(|(path, _)| path.clone())
            });
            match path {
                Some(path) => match ctx.systemd.cancel_job(&path).await {
                    Ok(()) => OpResult::Ok,
                    Err(e) => OpResult::err(WireError::failed(e.to_string())),
                },
                None => {
                    OpResult::err(WireError::new(ErrCode::NotFound, format!("no such job: {job}")))
                }
            }
        }

        AgentOp::ListUnits => match ctx.systemd.list_units().await {
            Ok(units) => OpResult::Units { units },
            Err(e) => OpResult::err(WireError::failed(e.to_string())),
        },

        AgentOp::ListUnitFiles => match ctx.systemd.list_unit_files().await {
            Ok(files) => OpResult::UnitFiles { files },
            Err(e) => OpResult::err(WireError::failed(e.to_string())),
        },

        AgentOp::GetUnitProperties { unit, interface } => {
            match ctx.systemd.get_unit_properties(&unit, &interface).await {
                Ok(props) => OpResult::Properties { props },
                Err(e) => OpResult::err(WireError::failed(e.to_string())),
            }
        }

        AgentOp::GetUnitProperty { unit, interface, property } => {
            match ctx.systemd.get_unit_property(&unit, &interface, &property).await {
                Ok(value) => OpResult::Property { value },
                Err(e) => OpResult::err(WireError::failed(e.to_string())),
            }
        }

        AgentOp::SetUnitProperties { unit, runtime, props } => {
            match ctx.systemd.set_unit_properties(&unit, runtime, props).await {
                Ok(()) => OpResult::Ok,
                Err(e) => OpResult::err(WireError::failed(e.to_string())),
            }
        }

        AgentOp::FreezeUnit { unit } => simple(ctx.systemd.freeze_unit(&unit).await),
        AgentOp::ThawUnit { unit } => simple(ctx.systemd.thaw_unit(&unit).await),
        AgentOp::KillUnit { unit, whom, signal } => {
            simple(ctx.systemd.kill_unit(&unit, &whom, signal).await)
        }
        AgentOp::ResetFailed { unit } => simple(ctx.systemd.reset_failed(unit.as_deref()).await),

        AgentOp::EnableUnitFiles { files, runtime, force } => {
            match ctx.systemd.enable_unit_files(&files, runtime, force).await {
                Ok((carries_install_info, changes)) => {
                    OpResult::UnitFileChanges { carries_install_info, changes }
                }
                Err(e) => OpResult::err(WireError::failed(e.to_string())),
            }
        }

        AgentOp::DisableUnitFiles { files, runtime } => {
            match ctx.systemd.disable_unit_files(&files, runtime).await {
                Ok(changes) => {
                    OpResult::UnitFileChanges { carries_install_info: false, changes }
                }
                Err(e) => OpResult::err(WireError::failed(e.to_string())),
            }
        }

        AgentOp::Reload => simple(ctx.systemd.daemon_reload().await),

        AgentOp::SetLogLevel { level } => {
            if let Some(log) = &ctx.log {
                log.set_level(level);
            }
            OpResult::Ok
        }

        AgentOp::Subscribe { unit } => subscribe(ctx, &unit).await,

        AgentOp::Unsubscribe { unit } => {
            ctx.lock_state_mut(|st| {
                if unit == WILDCARD {
                    st.wildcard_subscribed = false;
                } else if let Some(entry) = st.units.get_mut(&unit_object_path(&unit)) {
                    entry.subscribed = false;
                }
                st.gc_units();
            });
            OpResult::Ok
        }

        AgentOp::StartDep { unit } => {
            let dep = dep_unit(&unit);
            if let Err(e) = ctx.systemd.start_unit(&dep, "replace").await {
                warn!(unit = %dep, "failed to start dependency: {}", e);
            }
            OpResult::Ok
        }

        AgentOp::StopDep { unit } => {
            let dep = dep_unit(&unit);
            if let Err(e) = ctx.systemd.stop_unit(&dep, "replace").await {
                warn!(unit = %dep, "failed to stop dependency: {}", e);
            }
            OpResult::Ok
        }

        AgentOp::EnableMetrics => {
            ctx.lock_state_mut(|st| st.metrics_enabled = true);
            OpResult::Ok
        }

        AgentOp::DisableMetrics => {
            ctx.lock_state_mut(|st| st.metrics_enabled = false);
            OpResult::Ok
        }
    }
}

fn simple(result: Result<(), SystemdError>) -> OpResult {
    match result {
        Ok(()) => OpResult::Ok,
        Err(e) => OpResult::err(WireError::failed(e.to_string())),
    }
}

/// The dependency unit started on the target side of a proxy relation.
pub fn dep_unit(unit: &str) -> String {
    format!("herd-dep@{unit}")
}

async fn lifecycle_op(
    ctx: &AgentCtx,
    method: JobType,
    unit: String,
    mode: String,
    job: JobId,
) -> OpResult {
    if !is_valid_unit_name(&unit) {
        return OpResult::err(WireError::invalid_args(format!("invalid unit name: {unit}")));
    }
    let result = match method {
        JobType::Start => ctx.systemd.start_unit(&unit, &mode).await,
        JobType::Stop => ctx.systemd.stop_unit(&unit, &mode).await,
        JobType::Restart => ctx.systemd.restart_unit(&unit, &mode).await,
        JobType::Reload => ctx.systemd.reload_unit(&unit, &mode).await,
    };
    match result {
        Ok(path) => {
            let start_us = ctx.clock.monotonic_us();
            ctx.lock_state_mut(|st| {
                st.jobs.insert(path, TrackedJob { job, method, unit, start_us });
            });
            OpResult::Job { job }
        }
        Err(e) => OpResult::err(WireError::failed(e.to_string())),
    }
}

/// Per-unit or wildcard subscription. A late subscriber to an
/// already-loaded unit gets an immediate virtual snapshot.
async fn subscribe(ctx: &AgentCtx, unit: &str) -> OpResult {
    if unit == WILDCARD {
        let already =
            ctx.lock_state_mut(|st| std::mem::replace(&mut st.wildcard_subscribed, true));
        if already {
            return OpResult::err(WireError::new(
                ErrCode::AlreadySubscribed,
                "Already wildcard subscribed",
            ));
        }
        return OpResult::Ok;
    }
    if !is_valid_unit_name(unit) {
        return OpResult::err(WireError::invalid_args(format!("invalid unit name: {unit}")));
    }

    let current = ctx.systemd.get_unit_state(unit).await.ok();
    ctx.lock_state_mut(|st| {
        let (loaded, active, sub_state) = {
            let entry = st.ensure_unit(unit);
            entry.subscribed = true;
            if let Some((active, sub)) = current {
                entry.loaded = true;
                entry.active = active;
                entry.sub_state = sub;
            }
            (entry.loaded, entry.active, entry.sub_state.clone())
        };
        if loaded {
            st.send(AgentMessage::UnitNew {
                unit: unit.to_string(),
                reason: EventReason::Virtual,
            });
            if active != ActiveState::Invalid {
                st.send(AgentMessage::UnitStateChanged {
                    unit: unit.to_string(),
                    active,
                    sub: sub_state,
                    reason: EventReason::Virtual,
                });
            }
        }
    });
    OpResult::Ok
}

/// Consume the systemd event stream for the life of the process.
pub async fn run_systemd_events(ctx: AgentCtx) -> Result<(), SystemdError> {
    let mut rx = ctx.systemd.subscribe_events().await?;
    while let Some(event) = rx.recv().await {
        handle_systemd_event(&ctx, event);
    }
    Ok(())
}

/// Translate one systemd signal into cache updates and controller
/// traffic. Wildcard subscription forwards everything; otherwise only
/// units marked subscribed.
pub fn handle_systemd_event(ctx: &AgentCtx, event: SystemdEvent) {
    let now = ctx.clock.monotonic_us();
    let mut guard = ctx.state.lock();
    let st = &mut *guard;

    match event {
        SystemdEvent::UnitNew { name, path } => {
            let forward = match st.units.get_mut(&path) {
                Some(entry) => {
                    entry.loaded = true;
                    entry.active = ActiveState::Inactive;
                    entry.sub_state = "dead".to_string();
                    entry.subscribed
                }
                None => false,
            } || st.wildcard_subscribed;
            if forward {
                st.send(AgentMessage::UnitNew { unit: name, reason: EventReason::Real });
            }
        }

        SystemdEvent::UnitRemoved { name, path } => {
            let forward = match st.units.get_mut(&path) {
                Some(entry) => {
                    entry.loaded = false;
                    entry.active = ActiveState::Invalid;
                    entry.sub_state = String::new();
                    entry.subscribed
                }
                None => false,
            } || st.wildcard_subscribed;
            if forward {
                st.send(AgentMessage::UnitRemoved { unit: name, reason: EventReason::Real });
            }
            st.gc_units();
        }

        SystemdEvent::UnitStateChanged { name, path, active, sub } => {
            let forward = match st.units.get_mut(&path) {
                Some(entry) => {
                    entry.loaded = true;
                    entry.active = active;
                    entry.sub_state = sub.clone();
                    entry.subscribed
                }
                None => false,
            } || st.wildcard_subscribed;
            if forward {
                st.send(AgentMessage::UnitStateChanged {
                    unit: name,
                    active,
                    sub,
                    reason: EventReason::Real,
                });
            }
        }

        SystemdEvent::UnitPropertiesChanged { name, interface, props } => {
            let forward = st.wildcard_subscribed
                || st.unit_by_name(&name).is_some_and(|u| u.subscribed);
            if forward {
                st.send(AgentMessage::UnitPropertiesChanged { unit: name, interface, props });
            }
        }

        SystemdEvent::JobRemoved { path, result } => {
            let Some(tracked) = st.jobs.remove(&path) else {
                debug!(path, "job removal for untracked job");
                return;
            };
            st.send(AgentMessage::JobDone { job: tracked.job, result });
            if st.metrics_enabled {
                st.send(AgentMessage::AgentJobMetrics {
                    unit: tracked.unit,
                    method: tracked.method,
                    elapsed_us: now.saturating_sub(tracked.start_us),
                });
            }
        }

        SystemdEvent::JobStateChanged { path, state } => {
            if let Some(tracked) = st.jobs.get(&path) {
                st.send(AgentMessage::JobStateChanged { job: tracked.job, state });
            }
        }
    }
}

#[cfg(test)]
#[path = "core_tests.rs"]
mod tests;
