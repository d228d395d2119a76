// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Controller singleton state.
//!
//! Every registry lives here, guarded by one mutex that is never held
//! across an await. Cross-references between registries are ids,
//! revalidated on lookup; pending async work holds a oneshot that a
//! removed record simply never resolves.

use crate::config::Config;
use crate::job::Job;
use crate::logging::LogHandle;
use crate::monitor::{Monitor, Subscription};
use crate::node::{AnonymousPeer, Node};
use crate::proxy::ProxyMonitor;
use herd_core::{Clock, JobId, MonitorId, ProxyId, Seq, SubscriptionId, SystemStatus};
use herd_wire::{ControllerSignal, MonitorFrame};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// A client connection receiving controller broadcast signals.
pub struct SignalListener {
    pub id: u64,
    pub tx: mpsc::UnboundedSender<ControllerSignal>,
}

/// All controller registries. Mutated only under the [`Ctx`] mutex.
#[derive(Default)]
pub struct ControllerState {
    /// Named nodes in registration order; fan-out replies concatenate
    /// in this order.
    pub nodes: IndexMap<String, Node>,
    /// Accepted connections that have not registered yet.
    pub anonymous: HashMap<u64, AnonymousPeer>,
    pub jobs: HashMap<JobId, Job>,
    pub monitors: HashMap<MonitorId, Monitor>,
    pub subscriptions: HashMap<SubscriptionId, Subscription>,
    pub proxy_monitors: HashMap<ProxyId, ProxyMonitor>,
    /// Named channels claimed by `MonitorListen` connections.
    pub peer_channels: HashMap<String, mpsc::UnboundedSender<MonitorFrame>>,
    pub listeners: Vec<SignalListener>,
    pub metrics_enabled: bool,
    pub system_status: SystemStatus,

    pub job_seq: Seq,
    pub monitor_seq: Seq,
    pub subscription_seq: Seq,
    pub proxy_seq: Seq,
    pub peer_seq: Seq,
    conn_seq: u64,
    listener_seq: u64,
}

impl ControllerState {
    pub fn new(config: &Config) -> Self {
        let mut state = Self::default();
        for name in config.provisioned_names() {
            let policy = config.node_policies.get(&name).cloned().unwrap_or_default();
            state.nodes.insert(name.clone(), Node::provisioned(name, policy.required_token));
        }
        state
    }

    pub fn next_conn_id(&mut self) -> u64 {
        self.conn_seq += 1;
        self.conn_seq
    }

    pub fn online_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_online()).count()
    }

    /// Deliver a signal to every listener, dropping closed ones.
    pub fn broadcast(&mut self, signal: ControllerSignal) {
        self.listeners.retain(|l| l.tx.send(signal.clone()).is_ok());
    }

    pub fn add_listener(&mut self, tx: mpsc::UnboundedSender<ControllerSignal>) -> u64 {
        self.listener_seq += 1;
        let id = self.listener_seq;
        self.listeners.push(SignalListener { id, tx });
        id
    }

    pub fn remove_listener(&mut self, id: u64) {
        self.listeners.retain(|l| l.id != id);
    }

    /// Recompute the derived fleet status and signal when it changed.
    /// The status only moves when the online count crosses the 0↔1 or
    /// N-1↔N boundaries, so this stays quiet in the degraded band.
    pub fn refresh_system_status(&mut self) {
        let status = SystemStatus::from_counts(self.online_count(), self.nodes.len());
        if status != self.system_status {
            self.system_status = status;
            self.broadcast(ControllerSignal::SystemStatusChanged { status });
        }
    }
}

/// Shared daemon context handed to every connection task.
#[derive(Clone)]
pub struct Ctx {
    pub state: Arc<Mutex<ControllerState>>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub shutdown: Arc<Notify>,
    pub log: Option<LogHandle>,
}

impl Ctx {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        let state = ControllerState::new(&config);
        Self {
            state: Arc::new(Mutex::new(state)),
            config: Arc::new(config),
            clock,
            shutdown: Arc::new(Notify::new()),
            log: None,
        }
    }

    /// Lock the state for a synchronous read.
    pub fn lock_state<T>(&self, f: impl FnOnce(&ControllerState) -> T) -> T {
        let guard = self.state.lock();
        f(&guard)
    }

    /// Lock the state for a synchronous mutation.
    pub fn lock_state_mut<T>(&self, f: impl FnOnce(&mut ControllerState) -> T) -> T {
        let mut guard = self.state.lock();
        f(&mut guard)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
