// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Monitor and subscription registries plus the event fan-out path.
//!
//! Monitors own subscriptions; node unit maps index subscription ids.
//! Dispatch resolves ids at delivery time, so a closed monitor or a
//! torn-down proxy is simply skipped. A monitor receives each inbound
//! event exactly once even when several of its subscriptions match.

use crate::proxy;
use crate::state::ControllerState;
use herd_core::unit::UnitProperties;
use herd_core::{
    is_valid_node_name, is_valid_peer_name, is_valid_unit_name, ActiveState, EventReason,
    MonitorId, PeerId, ProxyId, SubscriptionId, WILDCARD,
};
use herd_wire::{ErrCode, MonitorEvent, MonitorFrame, WireError};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Substate string used in disconnect-sweep virtual events.
pub const SUBSTATE_AGENT_OFFLINE: &str = "agent-offline";

/// An extra delivery target registered on a monitor.
#[derive(Debug, Clone)]
pub struct MonitorPeer {
    pub id: PeerId,
    pub name: String,
}

/// A client-owned aggregator of subscriptions.
pub struct Monitor {
    pub id: MonitorId,
    pub tx: mpsc::UnboundedSender<MonitorFrame>,
    pub subscriptions: Vec<SubscriptionId>,
    pub peers: Vec<MonitorPeer>,
}

impl Monitor {
    pub fn path(id: MonitorId) -> String {
        format!("/herd/monitor/{id}")
    }
}

/// Where a subscription's events are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubSink {
    Monitor(MonitorId),
    Proxy(ProxyId),
}

/// A durable interest in events from one node (or `*`) for a set of
/// units (wildcard allowed).
pub struct Subscription {
    pub id: SubscriptionId,
    pub sink: SubSink,
    pub node: String,
    pub units: Vec<String>,
}

/// Create a monitor bound to one owner connection.
pub fn create_monitor(
    st: &mut ControllerState,
    tx: mpsc::UnboundedSender<MonitorFrame>,
) -> (MonitorId, String) {
    let id = MonitorId::new(st.monitor_seq.next());
    st.monitors.insert(id, Monitor { id, tx, subscriptions: Vec::new(), peers: Vec::new() });
    (id, Monitor::path(id))
}

/// Close a monitor: remove every subscription it owns from the global
/// index, notify its peers, and revoke the export.
pub fn close_monitor(st: &mut ControllerState, id: MonitorId) {
    let Some(monitor) = st.monitors.remove(&id) else {
        return;
    };
    for sub_id in &monitor.subscriptions {
        remove_subscription(st, *sub_id);
    }
    for peer in &monitor.peers {
        if let Some(ch) = st.peer_channels.get(&peer.name) {
            let _ = ch.send(MonitorFrame::PeerRemoved { reason: "monitor closed".to_string() });
        }
    }
    let _ = monitor.tx.send(MonitorFrame::Closed);
    debug!(monitor = %id, "monitor closed");
}

/// Add a subscription for `(node, units)` owned by `monitor_id`.
pub fn subscribe(
    st: &mut ControllerState,
    monitor_id: MonitorId,
    node: &str,
    units: Vec<String>,
) -> Result<SubscriptionId, WireError> {
    if node != WILDCARD && !is_valid_node_name(node) {
        return Err(WireError::invalid_args(format!("invalid node name: {node}")));
    }
    if units.is_empty() {
        return Err(WireError::invalid_args("no units given"));
    }
    for unit in &units {
        if unit != WILDCARD && !is_valid_unit_name(unit) {
            return Err(WireError::invalid_args(format!("invalid unit name: {unit}")));
        }
    }
    let Some(monitor) = st.monitors.get_mut(&monitor_id) else {
        return Err(WireError::new(ErrCode::NotFound, "no such monitor"));
    };

    let id = SubscriptionId::new(st.subscription_seq.next());
    monitor.subscriptions.push(id);
    st.subscriptions.insert(
        id,
        Subscription { id, sink: SubSink::Monitor(monitor_id), node: node.to_string(), units },
    );
    index_subscription(st, id);
    Ok(id)
}

/// Register an internal subscription relaying to a proxy monitor.
pub fn subscribe_proxy(
    st: &mut ControllerState,
    proxy_id: ProxyId,
    node: &str,
    unit: &str,
) -> SubscriptionId {
    let id = SubscriptionId::new(st.subscription_seq.next());
    st.subscriptions.insert(
        id,
        Subscription {
            id,
            sink: SubSink::Proxy(proxy_id),
            node: node.to_string(),
            units: vec![unit.to_string()],
        },
    );
    index_subscription(st, id);
    id
}

/// Enter a subscription into the unit maps of every node it targets.
fn index_subscription(st: &mut ControllerState, sub_id: SubscriptionId) {
    let Some(sub) = st.subscriptions.get(&sub_id) else {
        return;
    };
    if sub.node == WILDCARD {
        let names: Vec<String> = st.nodes.keys().cloned().collect();
        for name in names {
            attach_subscription_to_node(st, &name, sub_id);
        }
    } else {
        let node = sub.node.clone();
        if st.nodes.contains_key(&node) {
            attach_subscription_to_node(st, &node, sub_id);
        } else {
            warn!(
                subscription = %sub_id,
                node = %node,
                "subscription targets unknown node; events start if it registers"
            );
        }
    }
}

/// Attach one subscription to one node's unit map, creating entries and
/// telling the agent about fresh interest. Known-loaded units get a
/// virtual snapshot so the subscriber does not miss the current state.
pub fn attach_subscription_to_node(st: &mut ControllerState, node_name: &str, sub_id: SubscriptionId) {
    let Some(sub) = st.subscriptions.get(&sub_id) else {
        return;
    };
    let sink = sub.sink;
    let units = sub.units.clone();

    let mut snapshots: Vec<MonitorEvent> = Vec::new();
    {
        let Some(node) = st.nodes.get_mut(node_name) else {
            return;
        };
        for unit in &units {
            let created = !node.units.contains_key(unit);
            let entry = node.units.entry(unit.clone()).or_default();
            if !entry.subs.contains(&sub_id) {
                entry.subs.push(sub_id);
            }
            if entry.loaded {
                snapshots.push(MonitorEvent::UnitNew {
                    node: node_name.to_string(),
                    unit: unit.clone(),
                    reason: EventReason::Virtual,
                });
                if entry.active != ActiveState::Invalid {
                    snapshots.push(MonitorEvent::UnitStateChanged {
                        node: node_name.to_string(),
                        unit: unit.clone(),
                        active: entry.active,
                        sub: entry.sub_state.clone(),
                        reason: EventReason::Virtual,
                    });
                }
            }
            if created {
                if let Some(link) = node.link.as_mut() {
                    link.notify(herd_wire::AgentOp::Subscribe { unit: unit.clone() });
                }
            }
        }
    }
    for event in snapshots {
        deliver_to_sink(st, sink, &event);
    }
}

/// Attach every matching subscription to a node that just registered.
pub fn attach_node_on_register(st: &mut ControllerState, node_name: &str) {
    let matching: Vec<SubscriptionId> = st
        .subscriptions
        .values()
        .filter(|s| s.node == node_name || s.node == WILDCARD)
        .map(|s| s.id)
        .collect();
    for sub_id in matching {
        attach_subscription_to_node(st, node_name, sub_id);
    }
}

/// Best-effort removal of one subscription owned by `monitor_id`.
/// Unknown ids succeed so cleanup stays idempotent.
pub fn unsubscribe(st: &mut ControllerState, monitor_id: MonitorId, sub_id: SubscriptionId) {
    let owned = st
        .subscriptions
        .get(&sub_id)
        .is_some_and(|s| s.sink == SubSink::Monitor(monitor_id));
    if !owned {
        debug!(subscription = %sub_id, "unsubscribe for unknown id");
        return;
    }
    remove_subscription(st, sub_id);
    if let Some(monitor) = st.monitors.get_mut(&monitor_id) {
        monitor.subscriptions.retain(|s| *s != sub_id);
    }
}

/// Remove a subscription from the global index and every node unit map
/// it was entered in. The last interest in a unit sends `Unsubscribe`
/// to the agent and drops the map entry.
pub fn remove_subscription(st: &mut ControllerState, sub_id: SubscriptionId) {
    let Some(sub) = st.subscriptions.remove(&sub_id) else {
        return;
    };
    let targets: Vec<String> = if sub.node == WILDCARD {
        st.nodes.keys().cloned().collect()
    } else {
        vec![sub.node.clone()]
    };
    for name in targets {
        let Some(node) = st.nodes.get_mut(&name) else {
            continue;
        };
        for unit in &sub.units {
            let Some(entry) = node.units.get_mut(unit) else {
                continue;
            };
            entry.subs.retain(|s| *s != sub_id);
            if entry.subs.is_empty() {
                node.units.remove(unit);
                if let Some(link) = node.link.as_mut() {
                    link.notify(herd_wire::AgentOp::Unsubscribe { unit: unit.clone() });
                }
            }
        }
    }
}

/// Register `name` on a monitor as an extra delivery target.
pub fn add_peer(
    st: &mut ControllerState,
    monitor_id: MonitorId,
    name: &str,
) -> Result<PeerId, WireError> {
    if !is_valid_peer_name(name) {
        return Err(WireError::invalid_args(format!("invalid peer name: {name}")));
    }
    let id = PeerId::new(st.peer_seq.next());
    let Some(monitor) = st.monitors.get_mut(&monitor_id) else {
        return Err(WireError::new(ErrCode::NotFound, "no such monitor"));
    };
    if monitor.peers.iter().any(|p| p.name == name) {
        return Err(WireError::invalid_args(format!("peer already added: {name}")));
    }
    monitor.peers.push(MonitorPeer { id, name: name.to_string() });
    Ok(id)
}

/// Remove a peer, emitting `PeerRemoved(reason)` to the departing
/// channel.
pub fn remove_peer(
    st: &mut ControllerState,
    monitor_id: MonitorId,
    peer_id: PeerId,
    reason: &str,
) -> Result<(), WireError> {
    let Some(monitor) = st.monitors.get_mut(&monitor_id) else {
        return Err(WireError::new(ErrCode::NotFound, "no such monitor"));
    };
    let Some(pos) = monitor.peers.iter().position(|p| p.id == peer_id) else {
        return Err(WireError::new(ErrCode::NotFound, "no such peer"));
    };
    let peer = monitor.peers.remove(pos);
    if let Some(ch) = st.peer_channels.get(&peer.name) {
        let _ = ch.send(MonitorFrame::PeerRemoved { reason: reason.to_string() });
    }
    Ok(())
}

/// The unique set of sinks interested in `(node, unit)`: the union of
/// subscriptions on the unit and on the node's unit wildcard, deduped
/// by owning sink so one monitor never sees an event twice.
fn unique_sinks(st: &ControllerState, node: &str, unit: &str) -> Vec<SubSink> {
    let mut seen = HashSet::new();
    let mut sinks = Vec::new();
    let Some(node) = st.nodes.get(node) else {
        return sinks;
    };
    let keys: &[&str] = if unit == WILDCARD { &[WILDCARD] } else { &[unit, WILDCARD] };
    for key in keys {
        if let Some(entry) = node.units.get(*key) {
            for sub_id in &entry.subs {
                if let Some(sub) = st.subscriptions.get(sub_id) {
                    if seen.insert(sub.sink) {
                        sinks.push(sub.sink);
                    }
                }
            }
        }
    }
    sinks
}

fn deliver_to_sink(st: &mut ControllerState, sink: SubSink, event: &MonitorEvent) {
    match sink {
        SubSink::Monitor(monitor_id) => {
            let Some(monitor) = st.monitors.get(&monitor_id) else {
                return;
            };
            let frame = MonitorFrame::Event { event: event.clone() };
            let _ = monitor.tx.send(frame.clone());
            for peer in &monitor.peers {
                if let Some(ch) = st.peer_channels.get(&peer.name) {
                    let _ = ch.send(frame.clone());
                }
            }
        }
        SubSink::Proxy(proxy_id) => {
            proxy::relay_event(st, proxy_id, event);
        }
    }
}

fn dispatch(st: &mut ControllerState, node: &str, unit: &str, event: MonitorEvent) {
    for sink in unique_sinks(st, node, unit) {
        deliver_to_sink(st, sink, &event);
    }
}

pub fn handle_unit_new(st: &mut ControllerState, node: &str, unit: &str, reason: EventReason) {
    if let Some(entry) = st.nodes.get_mut(node).and_then(|n| n.units.get_mut(unit)) {
        entry.loaded = true;
    }
    let event =
        MonitorEvent::UnitNew { node: node.to_string(), unit: unit.to_string(), reason };
    dispatch(st, node, unit, event);
}

pub fn handle_unit_removed(st: &mut ControllerState, node: &str, unit: &str, reason: EventReason) {
    if let Some(entry) = st.nodes.get_mut(node).and_then(|n| n.units.get_mut(unit)) {
        entry.loaded = false;
        entry.active = ActiveState::Invalid;
        entry.sub_state.clear();
    }
    let event =
        MonitorEvent::UnitRemoved { node: node.to_string(), unit: unit.to_string(), reason };
    dispatch(st, node, unit, event);
}

pub fn handle_unit_state_changed(
    st: &mut ControllerState,
    node: &str,
    unit: &str,
    active: ActiveState,
    sub: &str,
    reason: EventReason,
) {
    if let Some(entry) = st.nodes.get_mut(node).and_then(|n| n.units.get_mut(unit)) {
        entry.loaded = true;
        entry.active = active;
        entry.sub_state = sub.to_string();
    }
    let event = MonitorEvent::UnitStateChanged {
        node: node.to_string(),
        unit: unit.to_string(),
        active,
        sub: sub.to_string(),
        reason,
    };
    dispatch(st, node, unit, event);
}

pub fn handle_unit_properties_changed(
    st: &mut ControllerState,
    node: &str,
    unit: &str,
    interface: &str,
    props: UnitProperties,
) {
    let event = MonitorEvent::UnitPropertiesChanged {
        node: node.to_string(),
        unit: unit.to_string(),
        interface: interface.to_string(),
        props,
    };
    dispatch(st, node, unit, event);
}

/// Disconnect sweep: for every loaded unit entry, synthesize the state
/// transition a subscriber would have seen had the units stopped, then
/// mark the entry not loaded.
pub fn node_offline_sweep(st: &mut ControllerState, node_name: &str) {
    let mut events: Vec<(String, MonitorEvent)> = Vec::new();
    if let Some(node) = st.nodes.get_mut(node_name) {
        for (unit, entry) in node.units.iter_mut() {
            if unit == WILDCARD || !entry.loaded {
                continue;
            }
            if entry.active != ActiveState::Inactive {
                events.push((
                    unit.clone(),
                    MonitorEvent::UnitStateChanged {
                        node: node_name.to_string(),
                        unit: unit.clone(),
                        active: ActiveState::Inactive,
                        sub: SUBSTATE_AGENT_OFFLINE.to_string(),
                        reason: EventReason::Virtual,
                    },
                ));
            }
            events.push((
                unit.clone(),
                MonitorEvent::UnitRemoved {
                    node: node_name.to_string(),
                    unit: unit.clone(),
                    reason: EventReason::Virtual,
                },
            ));
            entry.loaded = false;
            entry.active = ActiveState::Invalid;
            entry.sub_state.clear();
        }
    }
    for (unit, event) in events {
        dispatch(st, node_name, &unit, event);
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
