// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Harness for the end-to-end scenarios.

use herd_agent::systemd::FakeSystemd;
use herd_agent::{config::AgentConfig, connection, core as agent_core, AgentCtx};
use herd_controller::{config::Config, Ctx, Listener};
use herd_core::SystemClock;
use herd_wire::{
    read_frame, read_frame_wait, write_frame, ClientReply, ClientRequest, ControllerSignal, Hello,
    MonitorEvent, MonitorFrame, MonitorRequest,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

pub const T: Duration = Duration::from_secs(5);

/// Start a controller listening on a UDS in `dir`.
pub async fn start_controller(dir: &Path, allowed: &[&str]) -> (Ctx, PathBuf) {
    let socket = dir.join("controller.sock");
    let config = Config {
        listen_tcp: false,
        socket_path: socket.clone(),
        state_dir: dir.to_path_buf(),
        allowed_node_names: (!allowed.is_empty())
            .then(|| allowed.iter().map(|s| s.to_string()).collect()),
        heartbeat_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(5),
        ..Config::default()
    };
    let ctx = Ctx::new(config, Arc::new(SystemClock::new()));
    let mut listener = Listener::new(ctx.clone());
    listener.add_uds(tokio::net::UnixListener::bind(&socket).unwrap());
    tokio::spawn(listener.run());
    (ctx, socket)
}

/// A running in-process agent with scripted systemd.
pub struct TestAgent {
    pub ctx: AgentCtx,
    pub systemd: FakeSystemd,
    link_task: JoinHandle<()>,
    events_task: JoinHandle<()>,
}

impl TestAgent {
    pub async fn start(name: &str, controller_socket: &Path) -> Self {
        let systemd = FakeSystemd::new();
        let config = AgentConfig {
            node_name: name.to_string(),
            controller_socket: Some(controller_socket.to_path_buf()),
            heartbeat_interval: Duration::from_millis(50),
            ..AgentConfig::default()
        };
        let ctx =
            AgentCtx::new(config, Arc::new(SystemClock::new()), Arc::new(systemd.clone()));
        let link_task = tokio::spawn(connection::run(ctx.clone()));
        let events_ctx = ctx.clone();
        let events_task = tokio::spawn(async move {
            let _ = agent_core::run_systemd_events(events_ctx).await;
        });
        Self { ctx, systemd, link_task, events_task }
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.lock_state(|st| st.link.is_connected())
    }

    /// Simulate killing the agent process: sever the live link so the
    /// controller observes the disconnect, then stop every task.
    pub fn kill(self) {
        self.ctx.lock_state(|st| st.link.sever());
        self.link_task.abort();
        self.events_task.abort();
    }
}

/// Issue one client request against the controller socket.
pub async fn client_request(socket: &Path, request: &ClientRequest) -> ClientReply {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    write_frame(&mut stream, &Hello::Client, T).await.unwrap();
    write_frame(&mut stream, request, T).await.unwrap();
    read_frame(&mut stream, T).await.unwrap()
}

/// A `Listen` connection collecting controller signals.
pub struct SignalClient {
    stream: UnixStream,
}

impl SignalClient {
    pub async fn connect(socket: &Path) -> Self {
        let mut stream = UnixStream::connect(socket).await.unwrap();
        write_frame(&mut stream, &Hello::Client, T).await.unwrap();
        write_frame(&mut stream, &ClientRequest::Listen, T).await.unwrap();
        let reply: ClientReply = read_frame(&mut stream, T).await.unwrap();
        assert!(matches!(reply, ClientReply::Listening));
        Self { stream }
    }

    pub async fn next_signal(&mut self) -> ControllerSignal {
        read_frame(&mut self.stream, T).await.unwrap()
    }

    /// Read until a signal matches, discarding everything else.
    pub async fn wait_for(
        &mut self,
        mut want: impl FnMut(&ControllerSignal) -> bool,
    ) -> ControllerSignal {
        loop {
            let signal = self.next_signal().await;
            if want(&signal) {
                return signal;
            }
        }
    }
}

/// A `CreateMonitor` connection.
pub struct MonitorClient {
    stream: UnixStream,
    buffered: VecDeque<MonitorEvent>,
}

impl MonitorClient {
    pub async fn create(socket: &Path) -> Self {
        let mut stream = UnixStream::connect(socket).await.unwrap();
        write_frame(&mut stream, &Hello::Client, T).await.unwrap();
        write_frame(&mut stream, &ClientRequest::CreateMonitor, T).await.unwrap();
        let reply: ClientReply = read_frame(&mut stream, T).await.unwrap();
        assert!(matches!(reply, ClientReply::Monitor { .. }));
        Self { stream, buffered: VecDeque::new() }
    }

    /// Send a request and return its (non-event) reply frame, stashing
    /// events that interleave.
    pub async fn request(&mut self, request: &MonitorRequest) -> MonitorFrame {
        write_frame(&mut self.stream, request, T).await.unwrap();
        loop {
            let frame: MonitorFrame = read_frame(&mut self.stream, T).await.unwrap();
            match frame {
                MonitorFrame::Event { event } => self.buffered.push_back(event),
                reply => return reply,
            }
        }
    }

    pub async fn subscribe(&mut self, node: &str, units: &[&str]) {
        let reply = self
            .request(&MonitorRequest::SubscribeList {
                node: node.to_string(),
                units: units.iter().map(|s| s.to_string()).collect(),
            })
            .await;
        assert!(matches!(reply, MonitorFrame::Subscribed { .. }), "subscribe failed: {reply:?}");
    }

    pub async fn next_event(&mut self) -> MonitorEvent {
        if let Some(event) = self.buffered.pop_front() {
            return event;
        }
        loop {
            let frame: MonitorFrame = read_frame(&mut self.stream, T).await.unwrap();
            if let MonitorFrame::Event { event } = frame {
                return event;
            }
        }
    }

    /// True when no event arrives within `window`.
    pub async fn quiet_for(&mut self, window: Duration) -> bool {
        if !self.buffered.is_empty() {
            return false;
        }
        match tokio::time::timeout(window, read_frame_wait::<_, MonitorFrame>(&mut self.stream))
            .await
        {
            Err(_) => true,
            Ok(Ok(MonitorFrame::Event { event })) => {
                self.buffered.push_back(event);
                false
            }
            Ok(_) => false,
        }
    }
}

/// Poll until `check` passes or a generous deadline expires.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
