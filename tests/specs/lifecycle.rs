// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Cold start, registration, and job lifecycle over real sockets.

use super::support::*;
use herd_core::{JobId, NodeStatus};
use herd_wire::{ClientReply, ClientRequest, ControllerSignal, NodeOp};

#[tokio::test]
async fn cold_start_register_and_run_a_job() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1"]).await;
    let agent = TestAgent::start("n1", &socket).await;
    wait_until(|| agent.is_connected()).await;

    // Exactly one node, online, with a peer address.
    let reply = client_request(&socket, &ClientRequest::ListNodes).await;
    let ClientReply::Nodes { nodes } = reply else {
        panic!("expected nodes, got {reply:?}");
    };
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].name, "n1");
    assert_eq!(nodes[0].status, NodeStatus::Online);
    assert!(!nodes[0].peer_ip.is_empty());

    let mut signals = SignalClient::connect(&socket).await;

    // First job gets id 1 and its path is visible before completion.
    let reply = client_request(
        &socket,
        &ClientRequest::Node {
            name: "n1".to_string(),
            op: NodeOp::StartUnit {
                unit: "hello.service".to_string(),
                mode: "replace".to_string(),
            },
        },
    )
    .await;
    let ClientReply::Job { id, path } = reply else {
        panic!("expected job, got {reply:?}");
    };
    assert_eq!(id, JobId::new(1));
    assert_eq!(path, "/herd/job/1");
    assert_eq!(agent.systemd.calls(), vec!["start:hello.service:replace".to_string()]);

    // systemd finishes the job; the terminal signal names everything.
    agent.systemd.emit(herd_agent::systemd::SystemdEvent::JobRemoved {
        path: "/org/freedesktop/systemd1/job/1".to_string(),
        result: "done".to_string(),
    });
    let signal = signals
        .wait_for(|s| matches!(s, ControllerSignal::JobRemoved { .. }))
        .await;
    let ControllerSignal::JobRemoved { id, path, node, unit, result } = signal else {
        unreachable!();
    };
    assert_eq!(id, JobId::new(1));
    assert_eq!(path, "/herd/job/1");
    assert_eq!(node, "n1");
    assert_eq!(unit, "hello.service");
    assert_eq!(result, "done");
}

#[tokio::test]
async fn agent_error_reaches_the_client_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, socket) = start_controller(dir.path(), &["n1"]).await;
    let agent = TestAgent::start("n1", &socket).await;
    wait_until(|| agent.is_connected()).await;
    agent.systemd.break_unit("broken.service", "unit is masked");

    let reply = client_request(
        &socket,
        &ClientRequest::Node {
            name: "n1".to_string(),
            op: NodeOp::StartUnit {
                unit: "broken.service".to_string(),
                mode: "replace".to_string(),
            },
        },
    )
    .await;
    let ClientReply::Error { error } = reply else {
        panic!("expected error, got {reply:?}");
    };
    assert!(error.message.contains("unit is masked"));

    // The failed job was never published.
    ctx.lock_state(|st| assert!(st.jobs.is_empty()));
}

#[tokio::test]
async fn unknown_names_are_rejected_and_may_retry() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1"]).await;

    let intruder = TestAgent::start("intruder", &socket).await;
    // The rejected agent ends up retrying, never online.
    wait_until(|| {
        intruder
            .ctx
            .lock_state(|st| matches!(st.link, herd_agent::core::LinkState::Retry { .. }))
    })
    .await;

    let reply = client_request(&socket, &ClientRequest::ListNodes).await;
    let ClientReply::Nodes { nodes } = reply else {
        panic!("expected nodes");
    };
    assert!(nodes.iter().all(|n| n.status == NodeStatus::Offline));
}

#[tokio::test]
async fn register_race_has_exactly_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1"]).await;

    let first = TestAgent::start("n1", &socket).await;
    wait_until(|| first.is_connected()).await;

    // The second claimant is rejected but keeps retrying.
    let second = TestAgent::start("n1", &socket).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!second.is_connected());
    assert!(first.is_connected());

    // Once the incumbent dies, the retry loop wins the name.
    first.kill();
    wait_until(|| second.is_connected()).await;
}

#[tokio::test]
async fn pass_through_ops_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, socket) = start_controller(dir.path(), &["n1"]).await;
    let agent = TestAgent::start("n1", &socket).await;
    wait_until(|| agent.is_connected()).await;
    agent.systemd.set_unit_state("a.service", herd_core::ActiveState::Active, "running");

    let reply = client_request(
        &socket,
        &ClientRequest::Node { name: "n1".to_string(), op: NodeOp::ListUnits },
    )
    .await;
    let ClientReply::Units { units } = reply else {
        panic!("expected units, got {reply:?}");
    };
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].name, "a.service");

    let reply = client_request(
        &socket,
        &ClientRequest::Node {
            name: "n1".to_string(),
            op: NodeOp::FreezeUnit { unit: "a.service".to_string() },
        },
    )
    .await;
    assert!(matches!(reply, ClientReply::Ok));
    assert!(agent.systemd.calls().contains(&"freeze:a.service".to_string()));

    // Fleet fan-out includes the one node's slice.
    let reply = client_request(&socket, &ClientRequest::ListUnits).await;
    let ClientReply::FleetUnits { nodes } = reply else {
        panic!("expected fleet units");
    };
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].units.as_ref().unwrap().len(), 1);
}
