// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use super::*;
use crate::config::AgentConfig;
use crate::core::AgentCtx;
use crate::systemd::FakeSystemd;
use herd_core::FakeClock;
use herd_wire::Hello;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;

fn t() -> Duration {
    Duration::from_secs(5)
}

fn ctx_for(socket: std::path::PathBuf) -> AgentCtx {
    let config = AgentConfig {
        node_name: "n1".to_string(),
        controller_socket: Some(socket),
        heartbeat_interval: Duration::from_millis(50),
        ..AgentConfig::default()
    };
    AgentCtx::new(config, Arc::new(FakeClock::new()), Arc::new(FakeSystemd::new()))
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn agent_registers_heartbeats_and_retries() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("controller.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let ctx = ctx_for(socket);

    tokio::spawn(run(ctx.clone()));

    // Fake controller side: accept, verify handshake, accept Register.
    let (mut stream, _) = listener.accept().await.unwrap();
    let hello: Hello = read_frame(&mut stream, t()).await.unwrap();
    assert_eq!(hello, Hello::Agent { token: None });
    let register: AgentMessage = read_frame(&mut stream, t()).await.unwrap();
    assert_eq!(register, AgentMessage::Register { serial: 1, name: "n1".to_string() });
    write_frame(
        &mut stream,
        &ControllerMessage::Reply { serial: 1, result: OpResult::Ok },
        t(),
    )
    .await
    .unwrap();

    wait_until(|| ctx.lock_state(|st| st.link.is_connected())).await;

    // Heartbeats tick on the configured interval.
    let msg: AgentMessage = read_frame(&mut stream, t()).await.unwrap();
    assert_eq!(msg, AgentMessage::Heartbeat);

    // Dropping the controller side puts the link into retry.
    drop(stream);
    wait_until(|| {
        ctx.lock_state(|st| matches!(st.link, crate::core::LinkState::Retry { .. }))
    })
    .await;

    // And the next accept is a fresh handshake attempt.
    let (mut stream, _) = listener.accept().await.unwrap();
    let hello: Hello = read_frame(&mut stream, t()).await.unwrap();
    assert_eq!(hello, Hello::Agent { token: None });
}

#[tokio::test]
async fn rejected_registration_goes_to_retry() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("controller.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let ctx = ctx_for(socket);

    tokio::spawn(run(ctx.clone()));

    let (mut stream, _) = listener.accept().await.unwrap();
    let _: Hello = read_frame(&mut stream, t()).await.unwrap();
    let _: AgentMessage = read_frame(&mut stream, t()).await.unwrap();
    write_frame(
        &mut stream,
        &ControllerMessage::Reply {
            serial: 1,
            result: OpResult::err(WireError::new(
                herd_wire::ErrCode::ServiceUnknown,
                "Unexpected node name",
            )),
        },
        t(),
    )
    .await
    .unwrap();

    wait_until(|| {
        ctx.lock_state(|st| {
            matches!(st.link, crate::core::LinkState::Retry { .. })
        })
    })
    .await;
}
