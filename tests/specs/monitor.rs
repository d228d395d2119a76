// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Monitor fan-out, dedup, and the disconnect sweep.

use super::support::*;
use herd_agent::systemd::SystemdEvent;
use herd_core::{ActiveState, EventReason, WILDCARD};
use herd_wire::MonitorEvent;
use std::time::Duration;

#[tokio::test]
async fn overlapping_subscriptions_deliver_once() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1"]).await;
    let agent = TestAgent::start("n1", &socket).await;
    wait_until(|| agent.is_connected()).await;

    let mut monitor = MonitorClient::create(&socket).await;
    monitor.subscribe("n1", &["a.service"]).await;
    monitor.subscribe(WILDCARD, &["a.service"]).await;

    // Let the agent-side Subscribe land before emitting.
    wait_until(|| {
        agent.ctx.lock_state(|st| st.unit_by_name("a.service").is_some_and(|u| u.subscribed))
    })
    .await;

    agent.systemd.emit(SystemdEvent::UnitStateChanged {
        name: "a.service".to_string(),
        path: herd_agent::systemd::unit_object_path("a.service"),
        active: ActiveState::Active,
        sub: "running".to_string(),
    });

    let event = monitor.next_event().await;
    assert_eq!(
        event,
        MonitorEvent::UnitStateChanged {
            node: "n1".to_string(),
            unit: "a.service".to_string(),
            active: ActiveState::Active,
            sub: "running".to_string(),
            reason: EventReason::Real,
        }
    );
    // Exactly one delivery despite two matching subscriptions.
    assert!(monitor.quiet_for(Duration::from_millis(200)).await);
}

#[tokio::test]
async fn late_subscriber_sees_current_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1"]).await;
    let agent = TestAgent::start("n1", &socket).await;
    wait_until(|| agent.is_connected()).await;

    // The unit is already running when interest arrives.
    agent.systemd.set_unit_state("x.service", ActiveState::Active, "running");

    let mut monitor = MonitorClient::create(&socket).await;
    monitor.subscribe("n1", &["x.service"]).await;

    let event = monitor.next_event().await;
    assert_eq!(
        event,
        MonitorEvent::UnitNew {
            node: "n1".to_string(),
            unit: "x.service".to_string(),
            reason: EventReason::Virtual,
        }
    );
    let event = monitor.next_event().await;
    assert!(matches!(
        event,
        MonitorEvent::UnitStateChanged { active: ActiveState::Active, reason: EventReason::Virtual, .. }
    ));
}

#[tokio::test]
async fn killed_agent_triggers_the_disconnect_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1"]).await;
    let agent = TestAgent::start("n1", &socket).await;
    wait_until(|| agent.is_connected()).await;
    agent.systemd.set_unit_state("x.service", ActiveState::Active, "running");

    let mut monitor = MonitorClient::create(&socket).await;
    monitor.subscribe("n1", &["x.service"]).await;
    // Drain the virtual snapshot.
    let _ = monitor.next_event().await;
    let _ = monitor.next_event().await;

    agent.kill();

    let event = monitor.next_event().await;
    assert_eq!(
        event,
        MonitorEvent::UnitStateChanged {
            node: "n1".to_string(),
            unit: "x.service".to_string(),
            active: ActiveState::Inactive,
            sub: "agent-offline".to_string(),
            reason: EventReason::Virtual,
        }
    );
    let event = monitor.next_event().await;
    assert_eq!(
        event,
        MonitorEvent::UnitRemoved {
            node: "n1".to_string(),
            unit: "x.service".to_string(),
            reason: EventReason::Virtual,
        }
    );
}

#[tokio::test]
async fn events_stop_after_unsubscribe() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1"]).await;
    let agent = TestAgent::start("n1", &socket).await;
    wait_until(|| agent.is_connected()).await;

    let mut monitor = MonitorClient::create(&socket).await;
    let reply = monitor
        .request(&herd_wire::MonitorRequest::Subscribe {
            node: "n1".to_string(),
            unit: "a.service".to_string(),
        })
        .await;
    let herd_wire::MonitorFrame::Subscribed { id } = reply else {
        panic!("expected subscribed, got {reply:?}");
    };
    wait_until(|| {
        agent.ctx.lock_state(|st| st.unit_by_name("a.service").is_some_and(|u| u.subscribed))
    })
    .await;

    let reply = monitor.request(&herd_wire::MonitorRequest::Unsubscribe { id }).await;
    assert!(matches!(reply, herd_wire::MonitorFrame::Unsubscribed));
    wait_until(|| agent.ctx.lock_state(|st| st.unit_by_name("a.service").is_none())).await;

    agent.systemd.emit(SystemdEvent::UnitStateChanged {
        name: "a.service".to_string(),
        path: herd_agent::systemd::unit_object_path("a.service"),
        active: ActiveState::Active,
        sub: "running".to_string(),
    });
    assert!(monitor.quiet_for(Duration::from_millis(200)).await);
}
