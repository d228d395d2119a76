// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Cross-node proxy dependencies end to end.

use super::support::*;
use herd_agent::proxy as agent_proxy;
use herd_agent::systemd::SystemdEvent;
use herd_core::ActiveState;
use herd_wire::LocalReply;

/// Start origin and target agents and declare app.service on n1
/// depending on db.service on n2. Returns the held readiness receiver.
async fn proxy_setup(
    dir: &std::path::Path,
) -> (TestAgent, TestAgent, tokio::sync::oneshot::Receiver<LocalReply>) {
    let (_ctx, socket) = start_controller(dir, &["n1", "n2"]).await;
    let origin = TestAgent::start("n1", &socket).await;
    let target = TestAgent::start("n2", &socket).await;
    wait_until(|| origin.is_connected() && target.is_connected()).await;

    let rx = agent_proxy::create_proxy(&origin.ctx, "app.service", "n2", "db.service").unwrap();

    // The controller starts the dep unit on the target and subscribes.
    wait_until(|| {
        target
            .systemd
            .calls()
            .contains(&"start:herd-dep@db.service:replace".to_string())
    })
    .await;
    wait_until(|| {
        target.ctx.lock_state(|st| st.unit_by_name("db.service").is_some_and(|u| u.subscribed))
    })
    .await;

    (origin, target, rx)
}

#[tokio::test]
async fn proxy_happy_path_reports_ready() {
    let dir = tempfile::tempdir().unwrap();
    let (_origin, target, rx) = proxy_setup(dir.path()).await;

    // db.service comes up on the target node.
    target.systemd.emit(SystemdEvent::UnitStateChanged {
        name: "db.service".to_string(),
        path: herd_agent::systemd::unit_object_path("db.service"),
        active: ActiveState::Active,
        sub: "running".to_string(),
    });

    let reply = rx.await.unwrap();
    assert!(matches!(reply, LocalReply::Proxy { .. }), "expected ready, got {reply:?}");
}

#[tokio::test]
async fn already_running_target_satisfies_readiness_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1", "n2"]).await;
    let origin = TestAgent::start("n1", &socket).await;
    let target = TestAgent::start("n2", &socket).await;
    wait_until(|| origin.is_connected() && target.is_connected()).await;

    // Target already active before the proxy exists: the subscribe
    // snapshot alone must satisfy the wait.
    target.systemd.set_unit_state("db.service", ActiveState::Active, "running");

    let rx = agent_proxy::create_proxy(&origin.ctx, "app.service", "n2", "db.service").unwrap();
    let reply = rx.await.unwrap();
    assert!(matches!(reply, LocalReply::Proxy { .. }), "expected ready, got {reply:?}");
}

#[tokio::test]
async fn vanished_target_stops_the_local_service() {
    let dir = tempfile::tempdir().unwrap();
    let (origin, target, rx) = proxy_setup(dir.path()).await;

    target.systemd.emit(SystemdEvent::UnitStateChanged {
        name: "db.service".to_string(),
        path: herd_agent::systemd::unit_object_path("db.service"),
        active: ActiveState::Active,
        sub: "running".to_string(),
    });
    rx.await.unwrap();

    // The target service dies for real.
    target.systemd.emit(SystemdEvent::UnitStateChanged {
        name: "db.service".to_string(),
        path: herd_agent::systemd::unit_object_path("db.service"),
        active: ActiveState::Inactive,
        sub: "dead".to_string(),
    });

    // The origin stops its local service; the proxy is gone.
    wait_until(|| origin.systemd.calls().contains(&"stop:app.service:replace".to_string())).await;
    wait_until(|| origin.ctx.lock_state(|st| st.proxies.is_empty())).await;

    // The stop path's RemoveProxy afterwards is a tolerated no-op.
    agent_proxy::remove_proxy(&origin.ctx, "app.service", "n2", "db.service");
}

#[tokio::test]
async fn failed_target_start_fails_the_create() {
    let dir = tempfile::tempdir().unwrap();
    let (origin, target, rx) = proxy_setup(dir.path()).await;

    target.systemd.emit(SystemdEvent::UnitStateChanged {
        name: "db.service".to_string(),
        path: herd_agent::systemd::unit_object_path("db.service"),
        active: ActiveState::Failed,
        sub: "failed".to_string(),
    });

    let reply = rx.await.unwrap();
    let LocalReply::Error { error } = reply else {
        panic!("expected failure, got {reply:?}");
    };
    assert_eq!(error.message, "Proxy service failed to start");
    wait_until(|| origin.ctx.lock_state(|st| st.proxies.is_empty())).await;
}

#[tokio::test]
async fn unknown_target_node_fails_the_create() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1"]).await;
    let origin = TestAgent::start("n1", &socket).await;
    wait_until(|| origin.is_connected()).await;

    let rx = agent_proxy::create_proxy(&origin.ctx, "app.service", "n9", "db.service").unwrap();
    let reply = rx.await.unwrap();
    assert!(matches!(reply, LocalReply::Error { .. }));
}

#[tokio::test]
async fn dep_refcount_survives_one_of_two_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1", "n2", "n3"]).await;
    let origin_a = TestAgent::start("n1", &socket).await;
    let origin_b = TestAgent::start("n3", &socket).await;
    let target = TestAgent::start("n2", &socket).await;
    wait_until(|| origin_a.is_connected() && origin_b.is_connected() && target.is_connected())
        .await;

    let _rx_a =
        agent_proxy::create_proxy(&origin_a.ctx, "app.service", "n2", "db.service").unwrap();
    let _rx_b =
        agent_proxy::create_proxy(&origin_b.ctx, "web.service", "n2", "db.service").unwrap();
    wait_until(|| {
        target
            .systemd
            .calls()
            .iter()
            .filter(|c| c.as_str() == "start:herd-dep@db.service:replace")
            .count()
            == 2
    })
    .await;

    // One dependent goes away: the dep unit must keep running.
    agent_proxy::remove_proxy(&origin_a.ctx, "app.service", "n2", "db.service");
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!target
        .systemd
        .calls()
        .contains(&"stop:herd-dep@db.service:replace".to_string()));

    // The last one stops it.
    agent_proxy::remove_proxy(&origin_b.ctx, "web.service", "n2", "db.service");
    wait_until(|| {
        target.systemd.calls().contains(&"stop:herd-dep@db.service:replace".to_string())
    })
    .await;
}
