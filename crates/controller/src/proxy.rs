// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Controller side of cross-node proxy dependencies.
//!
//! One `ProxyMonitor` per announced proxy: it owns a subscription on
//! the target `(node, unit)` and relays target events back to the
//! originating agent. Dependency refcounts are per (target node, unit);
//! every add re-sends `StartDep` (the dep unit may have been stopped by
//! the target stopping), only the last remove sends `StopDep`. A
//! target-side failure event never decrements the count — only explicit
//! removal or origin teardown does.

use crate::monitor;
use crate::state::ControllerState;
use herd_core::ProxyId;
use herd_wire::{AgentOp, ControllerMessage, MonitorEvent};
use tracing::{debug, info, warn};

/// Controller-side record of one proxy relation.
pub struct ProxyMonitor {
    pub id: ProxyId,
    pub origin_node: String,
    /// Agent-side id, scoped to the origin node's connection; used to
    /// address the target feed.
    pub origin_proxy: ProxyId,
    pub target_node: String,
    pub unit: String,
    pub subscription: herd_core::SubscriptionId,
    pub added_dep: bool,
}

/// An agent announced a new proxy: wire up monitoring of the target.
pub fn handle_proxy_new(
    st: &mut ControllerState,
    origin: &str,
    origin_proxy: ProxyId,
    target: &str,
    unit: &str,
) {
    if !st.nodes.contains_key(target) {
        warn!(origin, target, unit, "proxy requested for unknown target node");
        send_to_origin(st, origin, ControllerMessage::ProxyError {
            proxy: origin_proxy,
            message: "No such node".to_string(),
        });
        return;
    }

    // An earlier proxy for the same relation is replaced.
    let old: Option<ProxyId> = st
        .proxy_monitors
        .values()
        .find(|pm| pm.origin_node == origin && pm.target_node == target && pm.unit == unit)
        .map(|pm| pm.id);
    if let Some(old_id) = old {
        warn!(origin, target, unit, "old proxy already exists, removing it");
        teardown(st, old_id);
    }

    let id = ProxyId::new(st.proxy_seq.next());
    info!(origin, target, unit, proxy = %id, "proxy monitor created");
    st.proxy_monitors.insert(
        id,
        ProxyMonitor {
            id,
            origin_node: origin.to_string(),
            origin_proxy,
            target_node: target.to_string(),
            unit: unit.to_string(),
            subscription: herd_core::SubscriptionId::new(0),
            added_dep: false,
        },
    );

    dep_add(st, target, unit);
    if let Some(pm) = st.proxy_monitors.get_mut(&id) {
        pm.added_dep = true;
    }

    // The attach path synthesizes a virtual snapshot; an already-active
    // target reaches the origin agent as a virtual active state change,
    // which satisfies its readiness wait.
    let sub_id = monitor::subscribe_proxy(st, id, target, unit);
    if let Some(pm) = st.proxy_monitors.get_mut(&id) {
        pm.subscription = sub_id;
    }
}

/// An agent announced a proxy teardown.
pub fn handle_proxy_removed(
    st: &mut ControllerState,
    origin: &str,
    origin_proxy: ProxyId,
    target: &str,
    unit: &str,
) {
    let found = st
        .proxy_monitors
        .values()
        .find(|pm| pm.origin_node == origin && pm.origin_proxy == origin_proxy)
        .map(|pm| pm.id);
    match found {
        Some(id) => teardown(st, id),
        None => debug!(origin, target, unit, "remove for unknown proxy"),
    }
}

/// Tear down every proxy monitor originated by a disconnected node.
/// The target's dep refcount is released, but the target service
/// itself is never touched — it may have other dependents.
pub fn origin_offline_sweep(st: &mut ControllerState, origin: &str) {
    let ids: Vec<ProxyId> = st
        .proxy_monitors
        .values()
        .filter(|pm| pm.origin_node == origin)
        .map(|pm| pm.id)
        .collect();
    for id in ids {
        teardown(st, id);
    }
}

fn teardown(st: &mut ControllerState, id: ProxyId) {
    let Some(pm) = st.proxy_monitors.remove(&id) else {
        return;
    };
    monitor::remove_subscription(st, pm.subscription);
    if pm.added_dep {
        dep_remove(st, &pm.target_node, &pm.unit);
    }
    debug!(proxy = %id, origin = %pm.origin_node, "proxy monitor torn down");
}

/// Relay a target event to the originating agent's proxy feed.
pub fn relay_event(st: &ControllerState, id: ProxyId, event: &MonitorEvent) {
    let Some(pm) = st.proxy_monitors.get(&id) else {
        return;
    };
    let msg = match event {
        MonitorEvent::UnitNew { .. } => {
            ControllerMessage::ProxyTargetNew { proxy: pm.origin_proxy }
        }
        MonitorEvent::UnitStateChanged { active, sub, reason, .. } => {
            ControllerMessage::ProxyTargetStateChanged {
                proxy: pm.origin_proxy,
                active: *active,
                sub: sub.clone(),
                reason: *reason,
            }
        }
        MonitorEvent::UnitRemoved { reason, .. } => {
            ControllerMessage::ProxyTargetRemoved { proxy: pm.origin_proxy, reason: *reason }
        }
        MonitorEvent::UnitPropertiesChanged { .. } => return,
    };
    send_to_origin(st, &pm.origin_node, msg);
}

fn send_to_origin(st: &ControllerState, origin: &str, msg: ControllerMessage) {
    if let Some(link) = st.nodes.get(origin).and_then(|n| n.link.as_ref()) {
        link.send(msg);
    }
}

/// Increment the per-(target, unit) dependency refcount and start the
/// dep unit. Re-sent on every add as an idempotent refresh.
pub fn dep_add(st: &mut ControllerState, target: &str, unit: &str) {
    let Some(node) = st.nodes.get_mut(target) else {
        return;
    };
    let count = node.deps.entry(unit.to_string()).or_insert(0);
    *count += 1;
    info!(target, unit, refs = *count, "starting dependency");
    if let Some(link) = node.link.as_mut() {
        link.notify(AgentOp::StartDep { unit: unit.to_string() });
    }
}

/// Decrement the refcount; the last reference stops the dep unit.
pub fn dep_remove(st: &mut ControllerState, target: &str, unit: &str) {
    let Some(node) = st.nodes.get_mut(target) else {
        return;
    };
    let Some(count) = node.deps.get_mut(unit) else {
        return;
    };
    *count = count.saturating_sub(1);
    if *count == 0 {
        node.deps.remove(unit);
        info!(target, unit, "stopping dependency");
        if let Some(link) = node.link.as_mut() {
            link.notify(AgentOp::StopDep { unit: unit.to_string() });
        }
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
