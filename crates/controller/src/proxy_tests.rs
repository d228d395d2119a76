// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use super::*;
use crate::node::UnitSub;
use crate::testing::{connect_agent, drain, test_ctx};
use herd_core::{ActiveState, EventReason, ProxyId};
use herd_wire::{AgentOp, ControllerMessage};

fn ops(msgs: &[ControllerMessage]) -> Vec<AgentOp> {
    msgs.iter()
        .filter_map(|m| match m {
            ControllerMessage::Request { op, .. } => Some(op.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn unknown_target_node_yields_proxy_error() {
    let (ctx, _clock) = test_ctx();
    let (_conn, mut origin_rx) = connect_agent(&ctx, "n1");

    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(7), "ghost", "db.service"));

    let msgs = drain(&mut origin_rx);
    assert!(msgs.iter().any(|m| matches!(
        m,
        ControllerMessage::ProxyError { proxy, message }
            if *proxy == ProxyId::new(7) && message == "No such node"
    )));
    ctx.lock_state(|st| assert!(st.proxy_monitors.is_empty()));
}

#[test]
fn proxy_new_starts_dep_and_subscribes_target() {
    let (ctx, _clock) = test_ctx();
    let (_c1, mut origin_rx) = connect_agent(&ctx, "n1");
    let (_c2, mut target_rx) = connect_agent(&ctx, "n2");

    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(1), "n2", "db.service"));

    let target_ops = ops(&drain(&mut target_rx));
    assert_eq!(
        target_ops,
        vec![
            AgentOp::StartDep { unit: "db.service".to_string() },
            AgentOp::Subscribe { unit: "db.service".to_string() },
        ]
    );
    ctx.lock_state(|st| {
        assert_eq!(st.proxy_monitors.len(), 1);
        assert_eq!(st.nodes.get("n2").unwrap().deps.get("db.service"), Some(&1));
        assert!(st.nodes.get("n2").unwrap().units.contains_key("db.service"));
    });
    // Target not yet loaded: no snapshot relayed.
    assert!(drain(&mut origin_rx).is_empty());
}

#[test]
fn target_state_changes_relay_to_origin() {
    let (ctx, _clock) = test_ctx();
    let (_c1, mut origin_rx) = connect_agent(&ctx, "n1");
    let (_c2, _target_rx) = connect_agent(&ctx, "n2");
    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(4), "n2", "db.service"));
    drain(&mut origin_rx);

    ctx.lock_state_mut(|st| {
        crate::monitor::handle_unit_state_changed(
            st,
            "n2",
            "db.service",
            ActiveState::Active,
            "running",
            EventReason::Real,
        )
    });

    let msgs = drain(&mut origin_rx);
    assert!(msgs.iter().any(|m| matches!(
        m,
        ControllerMessage::ProxyTargetStateChanged {
            proxy,
            active: ActiveState::Active,
            reason: EventReason::Real,
            ..
        } if *proxy == ProxyId::new(4)
    )));
}

#[test]
fn already_active_target_relays_virtual_snapshot() {
    let (ctx, _clock) = test_ctx();
    let (_c1, mut origin_rx) = connect_agent(&ctx, "n1");
    let (_c2, _target_rx) = connect_agent(&ctx, "n2");
    ctx.lock_state_mut(|st| {
        let node = st.nodes.get_mut("n2").unwrap();
        node.units.insert(
            "db.service".to_string(),
            UnitSub {
                loaded: true,
                active: ActiveState::Active,
                sub_state: "running".to_string(),
                subs: vec![],
            },
        );
    });

    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(2), "n2", "db.service"));

    let msgs = drain(&mut origin_rx);
    assert!(msgs.iter().any(|m| matches!(m, ControllerMessage::ProxyTargetNew { proxy } if *proxy == ProxyId::new(2))));
    assert!(msgs.iter().any(|m| matches!(
        m,
        ControllerMessage::ProxyTargetStateChanged {
            active: ActiveState::Active,
            reason: EventReason::Virtual,
            ..
        }
    )));
}

#[test]
fn duplicate_relation_replaces_older_monitor() {
    let (ctx, _clock) = test_ctx();
    let (_c1, _origin_rx) = connect_agent(&ctx, "n1");
    let (_c2, _target_rx) = connect_agent(&ctx, "n2");

    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(1), "n2", "db.service"));
    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(2), "n2", "db.service"));

    ctx.lock_state(|st| {
        assert_eq!(st.proxy_monitors.len(), 1);
        let pm = st.proxy_monitors.values().next().unwrap();
        assert_eq!(pm.origin_proxy, ProxyId::new(2));
        assert_eq!(st.nodes.get("n2").unwrap().deps.get("db.service"), Some(&1));
    });
}

#[test]
fn refcount_stops_dep_only_on_last_removal() {
    let (ctx, _clock) = test_ctx();
    let (_c1, _rx1) = connect_agent(&ctx, "n1");
    let (_c3, _rx3) = connect_agent(&ctx, "n3");
    let (_c2, mut target_rx) = connect_agent(&ctx, "n2");

    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(1), "n2", "db.service"));
    ctx.lock_state_mut(|st| handle_proxy_new(st, "n3", ProxyId::new(1), "n2", "db.service"));
    ctx.lock_state(|st| {
        assert_eq!(st.nodes.get("n2").unwrap().deps.get("db.service"), Some(&2));
    });
    // Two adds, two StartDep refreshes.
    let start_count = ops(&drain(&mut target_rx))
        .iter()
        .filter(|op| matches!(op, AgentOp::StartDep { .. }))
        .count();
    assert_eq!(start_count, 2);

    ctx.lock_state_mut(|st| handle_proxy_removed(st, "n1", ProxyId::new(1), "n2", "db.service"));
    assert!(!ops(&drain(&mut target_rx))
        .iter()
        .any(|op| matches!(op, AgentOp::StopDep { .. })));

    ctx.lock_state_mut(|st| handle_proxy_removed(st, "n3", ProxyId::new(1), "n2", "db.service"));
    assert!(ops(&drain(&mut target_rx))
        .iter()
        .any(|op| matches!(op, AgentOp::StopDep { .. })));
    ctx.lock_state(|st| {
        assert!(st.nodes.get("n2").unwrap().deps.is_empty());
        assert!(st.proxy_monitors.is_empty());
    });
}

#[test]
fn target_failure_does_not_release_the_dep() {
    let (ctx, _clock) = test_ctx();
    let (_c1, _origin_rx) = connect_agent(&ctx, "n1");
    let (_c2, mut target_rx) = connect_agent(&ctx, "n2");
    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(1), "n2", "db.service"));
    drain(&mut target_rx);

    ctx.lock_state_mut(|st| {
        crate::monitor::handle_unit_state_changed(
            st,
            "n2",
            "db.service",
            ActiveState::Failed,
            "failed",
            EventReason::Real,
        )
    });

    ctx.lock_state(|st| {
        assert_eq!(st.nodes.get("n2").unwrap().deps.get("db.service"), Some(&1));
        assert_eq!(st.proxy_monitors.len(), 1);
    });
    assert!(!ops(&drain(&mut target_rx)).iter().any(|op| matches!(op, AgentOp::StopDep { .. })));
}

#[test]
fn origin_disconnect_tears_down_its_monitors() {
    let (ctx, _clock) = test_ctx();
    let (origin_conn, _origin_rx) = connect_agent(&ctx, "n1");
    let (_c2, mut target_rx) = connect_agent(&ctx, "n2");
    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(1), "n2", "db.service"));
    drain(&mut target_rx);

    crate::node::disconnect(&ctx, "n1", origin_conn);

    ctx.lock_state(|st| {
        assert!(st.proxy_monitors.is_empty());
        assert!(st.nodes.get("n2").unwrap().deps.is_empty());
    });
    assert!(ops(&drain(&mut target_rx))
        .iter()
        .any(|op| matches!(op, AgentOp::StopDep { .. })));
}

#[test]
fn target_disconnect_cascades_virtual_removal_to_origin() {
    let (ctx, _clock) = test_ctx();
    let (_c1, mut origin_rx) = connect_agent(&ctx, "n1");
    let (target_conn, _target_rx) = connect_agent(&ctx, "n2");
    ctx.lock_state_mut(|st| handle_proxy_new(st, "n1", ProxyId::new(1), "n2", "db.service"));
    ctx.lock_state_mut(|st| {
        crate::monitor::handle_unit_state_changed(
            st,
            "n2",
            "db.service",
            ActiveState::Active,
            "running",
            EventReason::Real,
        )
    });
    drain(&mut origin_rx);

    crate::node::disconnect(&ctx, "n2", target_conn);

    let msgs = drain(&mut origin_rx);
    assert!(msgs.iter().any(|m| matches!(
        m,
        ControllerMessage::ProxyTargetStateChanged {
            active: ActiveState::Inactive,
            reason: EventReason::Virtual,
            ..
        }
    )));
    assert!(msgs.iter().any(|m| matches!(
        m,
        ControllerMessage::ProxyTargetRemoved { reason: EventReason::Virtual, .. }
    )));
}
