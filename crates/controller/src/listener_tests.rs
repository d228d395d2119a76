// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use super::*;
use crate::testing::{config_with_allowed, test_ctx_with};
use herd_core::NodeStatus;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};

fn t() -> std::time::Duration {
    std::time::Duration::from_secs(5)
}

async fn start_uds(ctx: Ctx, dir: &Path) -> PathBuf {
    let path = dir.join("controller.sock");
    let mut listener = Listener::new(ctx);
    listener.add_uds(UnixListener::bind(&path).unwrap());
    tokio::spawn(listener.run());
    path
}

async fn client_request(path: &Path, request: &ClientRequest) -> ClientReply {
    let mut stream = UnixStream::connect(path).await.unwrap();
    write_frame(&mut stream, &Hello::Client, t()).await.unwrap();
    write_frame(&mut stream, request, t()).await.unwrap();
    read_frame(&mut stream, t()).await.unwrap()
}

#[tokio::test]
async fn list_nodes_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _clock) = test_ctx_with(config_with_allowed(&["n1"]));
    let path = start_uds(ctx, dir.path()).await;

    let reply = client_request(&path, &ClientRequest::ListNodes).await;
    let ClientReply::Nodes { nodes } = reply else {
        panic!("expected node list, got {reply:?}");
    };
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].name, "n1");
    assert_eq!(nodes[0].status, NodeStatus::Offline);
}

#[tokio::test]
async fn agent_registers_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _clock) = test_ctx_with(config_with_allowed(&["n1"]));
    let path = start_uds(ctx, dir.path()).await;

    let mut agent = UnixStream::connect(&path).await.unwrap();
    write_frame(&mut agent, &Hello::Agent { token: None }, t()).await.unwrap();
    write_frame(&mut agent, &AgentMessage::Register { serial: 1, name: "n1".to_string() }, t())
        .await
        .unwrap();
    let reply: ControllerMessage = read_frame(&mut agent, t()).await.unwrap();
    assert_eq!(reply, ControllerMessage::Reply { serial: 1, result: OpResult::Ok });

    let reply = client_request(&path, &ClientRequest::ListNodes).await;
    let ClientReply::Nodes { nodes } = reply else {
        panic!("expected node list");
    };
    assert_eq!(nodes[0].status, NodeStatus::Online);
    assert!(nodes[0].peer_ip.starts_with("local"));
}

#[tokio::test]
async fn unknown_node_and_bad_level_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _clock) = test_ctx_with(config_with_allowed(&["n1"]));
    let path = start_uds(ctx, dir.path()).await;

    let reply = client_request(&path, &ClientRequest::GetNode { name: "nope".to_string() }).await;
    let ClientReply::Error { error } = reply else {
        panic!("expected error");
    };
    assert_eq!(error.code, ErrCode::ServiceUnknown);

    let reply =
        client_request(&path, &ClientRequest::SetLogLevel { level: "LOUD".to_string() }).await;
    let ClientReply::Error { error } = reply else {
        panic!("expected error");
    };
    assert_eq!(error.code, ErrCode::InvalidArgs);
}
