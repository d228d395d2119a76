// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Agent side of cross-node proxy dependencies.
//!
//! One `ProxyService` per `CreateProxy` request. The local caller's
//! reply is held until the target's state is determined: any active
//! state (virtual included) means ready; failed/inactive/removed count
//! only when real, because virtual events replay the state at
//! subscription time rather than a live transition.

use crate::core::AgentCtx;
use herd_core::{
    is_valid_node_name, is_valid_unit_name, ActiveState, EventReason, ProxyId,
};
use herd_wire::{AgentMessage, ErrCode, LocalReply, WireError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// One local service's dependency on a remote unit.
pub struct ProxyService {
    pub id: ProxyId,
    pub local_service: String,
    pub node: String,
    pub unit: String,
    /// Held `CreateProxy` reply, consumed when readiness resolves.
    pub reply: Option<oneshot::Sender<LocalReply>>,
    /// ProxyNew reached the controller; ProxyRemoved must follow.
    pub sent_new_proxy: bool,
    /// Teardown came from the local stop path; don't stop again.
    pub dont_stop_proxy: bool,
    pub sent_successful_ready: bool,
}

impl ProxyService {
    pub fn path(id: ProxyId) -> String {
        format!("/herd/proxy/{id}")
    }
}

/// Register a proxy and announce it to the controller. The returned
/// receiver resolves when the target's state is determined.
pub fn create_proxy(
    ctx: &AgentCtx,
    local_service: &str,
    node: &str,
    unit: &str,
) -> Result<oneshot::Receiver<LocalReply>, WireError> {
    if !is_valid_node_name(node) {
        return Err(WireError::invalid_args(format!("invalid node name: {node}")));
    }
    if !is_valid_unit_name(unit) {
        return Err(WireError::invalid_args(format!("invalid unit name: {unit}")));
    }

    ctx.lock_state_mut(|st| {
        let duplicate = st
            .proxies
            .values()
            .any(|p| p.local_service == local_service && p.node == node && p.unit == unit);
        if duplicate {
            return Err(WireError::new(
                ErrCode::AddressInUse,
                format!("proxy for {unit} on {node} already exists"),
            ));
        }

        let id = ProxyId::new(st.proxy_seq.next());
        let (tx, rx) = oneshot::channel();
        let sent_new_proxy = st.send(AgentMessage::ProxyNew {
            proxy: id,
            node: node.to_string(),
            unit: unit.to_string(),
        });
        info!(proxy = %id, local = local_service, node, unit, "proxy created");
        st.proxies.insert(
            id,
            ProxyService {
                id,
                local_service: local_service.to_string(),
                node: node.to_string(),
                unit: unit.to_string(),
                reply: Some(tx),
                sent_new_proxy,
                dont_stop_proxy: false,
                sent_successful_ready: false,
            },
        );
        Ok(rx)
    })
}

/// Announce proxies created while the controller link was down. Called
/// whenever the link comes up.
pub fn announce_pending(ctx: &AgentCtx) {
    ctx.lock_state_mut(|st| {
        let pending: Vec<(ProxyId, String, String)> = st
            .proxies
            .values()
            .filter(|p| !p.sent_new_proxy)
            .map(|p| (p.id, p.node.clone(), p.unit.clone()))
            .collect();
        for (id, node, unit) in pending {
            if st.send(AgentMessage::ProxyNew { proxy: id, node, unit }) {
                if let Some(proxy) = st.proxies.get_mut(&id) {
                    proxy.sent_new_proxy = true;
                }
            }
        }
    });
}

/// Best-effort removal from the local stop path. Succeeds even when
/// the proxy is already gone, so the stop path stays idempotent.
pub fn remove_proxy(ctx: &AgentCtx, local_service: &str, node: &str, unit: &str) {
    let found = ctx.lock_state_mut(|st| {
        let id = st
            .proxies
            .values()
            .find(|p| p.local_service == local_service && p.node == node && p.unit == unit)
            .map(|p| p.id);
        if let Some(id) = id {
            if let Some(proxy) = st.proxies.get_mut(&id) {
                proxy.dont_stop_proxy = true;
            }
        }
        id
    });
    match found {
        Some(id) => teardown(ctx, id),
        None => debug!(local = local_service, node, unit, "remove for unknown proxy"),
    }
}

pub fn handle_target_new(ctx: &AgentCtx, id: ProxyId) {
    let known = ctx.lock_state(|st| st.proxies.contains_key(&id));
    debug!(proxy = %id, known, "target tracked");
}

/// The initial-readiness state machine plus the monitoring phase.
pub fn handle_target_state_changed(
    ctx: &AgentCtx,
    id: ProxyId,
    active: ActiveState,
    sub: &str,
    reason: EventReason,
) {
    debug!(proxy = %id, active = %active, sub, reason = %reason, "target state changed");

    enum Outcome {
        Nothing,
        Ready,
        FailedToStart,
        TargetStopped,
    }

    let outcome = ctx.lock_state_mut(|st| {
        let Some(proxy) = st.proxies.get_mut(&id) else {
            return Outcome::Nothing;
        };
        if proxy.reply.is_some() {
            // Waiting for readiness. A virtual active state is fine:
            // the target was already running at subscription time.
            if active.is_active() {
                Outcome::Ready
            } else if active.is_terminal_failure() && reason == EventReason::Real {
                Outcome::FailedToStart
            } else {
                Outcome::Nothing
            }
        } else if proxy.sent_successful_ready
            && active.is_terminal_failure()
            && reason == EventReason::Real
        {
            Outcome::TargetStopped
        } else {
            Outcome::Nothing
        }
    });

    match outcome {
        Outcome::Nothing => {}
        Outcome::Ready => initial_state_reached(ctx, id, true),
        Outcome::FailedToStart => initial_state_reached(ctx, id, false),
        Outcome::TargetStopped => {
            info!(proxy = %id, "target stopped, tearing down proxy");
            teardown(ctx, id);
        }
    }
}

pub fn handle_target_removed(ctx: &AgentCtx, id: ProxyId, reason: EventReason) {
    debug!(proxy = %id, reason = %reason, "target removed");
    let waiting =
        ctx.lock_state(|st| st.proxies.get(&id).is_some_and(|p| p.reply.is_some()));
    if waiting && reason == EventReason::Real {
        initial_state_reached(ctx, id, false);
    }
}

/// Sent once by the controller when the monitor could not be set up;
/// no other target messages follow.
pub fn handle_proxy_error(ctx: &AgentCtx, id: ProxyId, message: &str) {
    warn!(proxy = %id, "proxy setup error: {}", message);
    let waiting =
        ctx.lock_state(|st| st.proxies.get(&id).is_some_and(|p| p.reply.is_some()));
    if waiting {
        initial_state_reached(ctx, id, false);
    }
}

/// Resolve the held reply. A failed start tears the proxy down; a
/// successful one switches it to the monitoring phase.
fn initial_state_reached(ctx: &AgentCtx, id: ProxyId, success: bool) {
    let resolved = ctx.lock_state_mut(|st| {
        let Some(proxy) = st.proxies.get_mut(&id) else {
            return false;
        };
        let Some(tx) = proxy.reply.take() else {
            return false;
        };
        if success {
            info!(local = %proxy.local_service, "proxy target ready");
            proxy.sent_successful_ready = true;
            let _ = tx.send(LocalReply::Proxy { id, path: ProxyService::path(id) });
        } else {
            info!(local = %proxy.local_service, "proxy target failed to start");
            let _ = tx.send(LocalReply::Error {
                error: WireError::failed("Proxy service failed to start"),
            });
        }
        true
    });
    if resolved && !success {
        teardown(ctx, id);
    }
}

/// Remove the proxy: unexport, tell the controller (when it ever
/// heard of it), and stop the local service if it had been started by
/// a successful readiness and the stop path didn't trigger us.
pub fn teardown(ctx: &AgentCtx, id: ProxyId) {
    let stop_local = ctx.lock_state_mut(|st| {
        let Some(mut proxy) = st.proxies.remove(&id) else {
            return None;
        };
        if let Some(tx) = proxy.reply.take() {
            let _ = tx.send(LocalReply::Error { error: WireError::failed("proxy removed") });
        }
        if proxy.sent_new_proxy {
            st.send(AgentMessage::ProxyRemoved {
                proxy: id,
                node: proxy.node.clone(),
                unit: proxy.unit.clone(),
            });
        }
        (proxy.sent_successful_ready && !proxy.dont_stop_proxy)
            .then_some(proxy.local_service)
    });

    if let Some(local_service) = stop_local {
        let systemd = ctx.systemd.clone();
        tokio::spawn(async move {
            if let Err(e) = systemd.stop_unit(&local_service, "replace").await {
                warn!(unit = %local_service, "failed to stop proxied service: {}", e);
            }
        });
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
