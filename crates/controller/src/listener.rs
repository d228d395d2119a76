// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Listener task for handling socket I/O.
//!
//! All acceptors (TCP, UDS, inherited fds) feed the same connection
//! path: read the Hello frame, then either serve one client request or
//! hold a long-lived agent / monitor / signal stream. Connections are
//! handled in spawned tasks; each long-lived connection has a writer
//! task draining an unbounded channel so state mutation never awaits.

use crate::config::KeepAlive;
use crate::monitor;
use crate::node::{self, AnonymousPeer};
use crate::state::Ctx;
use herd_core::{JobType, MonitorId};
use herd_wire::{
    read_frame, read_frame_wait, write_frame, AgentMessage, AgentOp, ClientReply, ClientRequest,
    ControllerMessage, ErrCode, Hello, MonitorFrame, MonitorRequest, NodeOp, OpResult,
    ProtocolError, WireError,
};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default IPC timeout for single request/reply exchanges.
pub fn ipc_timeout() -> Duration {
    std::env::var("HERD_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Listener task owning every acceptor.
pub struct Listener {
    uds: Vec<UnixListener>,
    tcp: Vec<TcpListener>,
    ctx: Ctx,
}

impl Listener {
    pub fn new(ctx: Ctx) -> Self {
        Self { uds: Vec::new(), tcp: Vec::new(), ctx }
    }

    pub fn add_uds(&mut self, listener: UnixListener) {
        self.uds.push(listener);
    }

    pub fn add_tcp(&mut self, listener: TcpListener) {
        self.tcp.push(listener);
    }

    /// Run every accept loop until the process exits.
    pub async fn run(self) {
        let mut tasks = Vec::new();
        for listener in self.uds {
            tasks.push(tokio::spawn(accept_uds_loop(listener, self.ctx.clone())));
        }
        for listener in self.tcp {
            tasks.push(tokio::spawn(accept_tcp_loop(listener, self.ctx.clone())));
        }
        futures_util::future::join_all(tasks).await;
    }
}

async fn accept_uds_loop(listener: UnixListener, ctx: Ctx) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let peer_ip = match stream.peer_cred() {
                    Ok(cred) => format!("local:uid={}", cred.uid()),
                    Err(_) => "local".to_string(),
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    handle_connection(reader, writer, peer_ip, ctx).await;
                });
            }
            Err(e) => error!("unix accept error: {}", e),
        }
    }
}

async fn accept_tcp_loop(listener: TcpListener, ctx: Ctx) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("tcp connection from {}", addr);
                if let Err(e) = apply_keepalive(&stream, &ctx.config.keepalive) {
                    warn!("failed to set keep-alive on {}: {}", addr, e);
                }
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    handle_connection(reader, writer, addr.ip().to_string(), ctx).await;
                });
            }
            Err(e) => error!("tcp accept error: {}", e),
        }
    }
}

/// Keep-alive options applied uniformly to accepted TCP sockets.
fn apply_keepalive(stream: &TcpStream, ka: &KeepAlive) -> std::io::Result<()> {
    let sock = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(ka.idle_secs))
        .with_interval(Duration::from_secs(ka.interval_secs))
        .with_retries(ka.count);
    sock.set_tcp_keepalive(&keepalive)
}

/// Dispatch a fresh connection by its Hello frame.
async fn handle_connection<R, W>(mut reader: R, writer: W, peer_ip: String, ctx: Ctx)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let hello: Hello = match read_frame(&mut reader, ipc_timeout()).await {
        Ok(hello) => hello,
        Err(ProtocolError::ConnectionClosed) => return,
        Err(e) => {
            debug!("bad hello: {}", e);
            return;
        }
    };
    match hello {
        Hello::Agent { token } => agent_connection(reader, writer, peer_ip, token, ctx).await,
        Hello::Client => client_connection(reader, writer, ctx).await,
    }
}

/// Generic writer task: drain a channel onto the socket until closed.
async fn pump_frames<W, T>(mut writer: W, mut rx: mpsc::UnboundedReceiver<T>, cancel: CancellationToken)
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if write_frame(&mut writer, &msg, ipc_timeout()).await.is_err() {
            cancel.cancel();
            break;
        }
    }
}

// -- agent peer connections --

async fn agent_connection<R, W>(
    mut reader: R,
    writer: W,
    peer_ip: String,
    token: Option<String>,
    ctx: Ctx,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let conn_id = ctx.lock_state_mut(|st| st.next_conn_id());
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    node::add_anonymous(
        &ctx,
        AnonymousPeer { conn_id, tx: tx.clone(), cancel: cancel.clone(), peer_ip },
    );
    let writer_task = tokio::spawn(pump_frames(writer, rx, cancel.clone()));
    let mut registered: Option<String> = None;

    loop {
        let msg: AgentMessage = tokio::select! {
            _ = cancel.cancelled() => break,
            res = read_frame_wait(&mut reader) => match res {
                Ok(msg) => msg,
                Err(ProtocolError::ConnectionClosed) => break,
                Err(e) => {
                    debug!("agent connection error: {}", e);
                    break;
                }
            },
        };
        match msg {
            AgentMessage::Register { serial, name } => {
                // A successful register queues its own reply ahead of
                // any re-subscribe traffic; only failures reply here.
                let error = if registered.is_some() {
                    Some(WireError::new(ErrCode::AddressInUse, "Can't register twice"))
                } else {
                    match node::register(&ctx, conn_id, &name, token.as_deref(), serial) {
                        Ok(()) => {
                            registered = Some(name);
                            None
                        }
                        Err(error) => Some(error),
                    }
                };
                if let Some(error) = error {
                    let _ = tx
                        .send(ControllerMessage::Reply { serial, result: OpResult::err(error) });
                }
            }
            msg => match registered.as_deref() {
                Some(name) => node::handle_agent_message(&ctx, name, msg),
                None => debug!("ignoring message from unregistered agent"),
            },
        }
    }

    cancel.cancel();
    match registered.as_deref() {
        Some(name) => node::disconnect(&ctx, name, conn_id),
        None => node::remove_anonymous(&ctx, conn_id),
    }
    let _ = writer_task.await;
}

// -- client connections --

async fn client_connection<R, W>(mut reader: R, mut writer: W, ctx: Ctx)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let request: ClientRequest = match read_frame(&mut reader, ipc_timeout()).await {
        Ok(request) => request,
        Err(ProtocolError::ConnectionClosed) => return,
        Err(e) => {
            debug!("bad client request: {}", e);
            return;
        }
    };
    debug!(request = ?request, "received client request");

    match request {
        ClientRequest::CreateMonitor => monitor_connection(reader, writer, ctx).await,
        ClientRequest::Listen => listen_connection(reader, writer, ctx).await,
        ClientRequest::MonitorListen { peer } => {
            peer_connection(reader, writer, peer, ctx).await
        }
        other => {
            let reply = handle_client_request(&ctx, other).await;
            if let Err(e) = write_frame(&mut writer, &reply, ipc_timeout()).await {
                debug!("failed to write reply: {}", e);
            }
        }
    }
}

/// Handle one non-upgrading client request.
pub async fn handle_client_request(ctx: &Ctx, request: ClientRequest) -> ClientReply {
    match request {
        ClientRequest::ListNodes => {
            ClientReply::Nodes { nodes: ctx.lock_state(|st| st.nodes.values().map(|n| n.entry()).collect()) }
        }

        ClientRequest::GetNode { name } => ctx.lock_state(|st| match st.nodes.get(&name) {
            Some(node) => ClientReply::Node { node: node.detail() },
            None => ClientReply::err(WireError::new(
                ErrCode::ServiceUnknown,
                format!("node {name} not found"),
            )),
        }),

        ClientRequest::ListUnits => {
            let nodes = node::fleet_list_units(ctx).await;
            if !nodes.is_empty() && nodes.iter().all(|n| n.error.is_some()) {
                return ClientReply::err(WireError::failed("all nodes failed"));
            }
            ClientReply::FleetUnits { nodes }
        }

        ClientRequest::ListUnitFiles => {
            let nodes = node::fleet_list_unit_files(ctx).await;
            if !nodes.is_empty() && nodes.iter().all(|n| n.error.is_some()) {
                return ClientReply::err(WireError::failed("all nodes failed"));
            }
            ClientReply::FleetUnitFiles { nodes }
        }

        ClientRequest::Status => ctx.lock_state(|st| ClientReply::Status {
            status: st.system_status,
            nodes: st.nodes.values().map(|n| n.entry()).collect(),
        }),

        ClientRequest::Node { name, op } => handle_node_op(ctx, &name, op).await,

        ClientRequest::CancelJob { id } => {
            let target = ctx.lock_state(|st| st.jobs.get(&id).map(|j| j.node.clone()));
            let Some(node_name) = target else {
                return ClientReply::err(WireError::new(
                    ErrCode::NotFound,
                    format!("no such job: {id}"),
                ));
            };
            // The cancel races with normal completion; ack immediately
            // and log the agent's answer when it arrives.
            let ctx = ctx.clone();
            tokio::spawn(async move {
                match node::call(&ctx, &node_name, AgentOp::CancelJob { job: id }).await {
                    Ok(_) => info!(job = %id, "job cancel accepted"),
                    Err(e) => warn!(job = %id, "job cancel failed: {}", e),
                }
            });
            ClientReply::Ok
        }

        ClientRequest::SetLogLevel { level } => match level.parse() {
            Ok(level) => {
                if let Some(log) = &ctx.log {
                    log.set_level(level);
                }
                info!(level = %level, "log level changed");
                ClientReply::Ok
            }
            Err(_) => {
                ClientReply::err(WireError::invalid_args(format!("invalid log level: {level}")))
            }
        },

        ClientRequest::EnableMetrics => {
            ctx.lock_state_mut(|st| {
                st.metrics_enabled = true;
                for node in st.nodes.values_mut() {
                    if let Some(link) = node.link.as_mut() {
                        link.notify(AgentOp::EnableMetrics);
                    }
                }
            });
            info!("metrics enabled");
            ClientReply::Ok
        }

        ClientRequest::DisableMetrics => {
            ctx.lock_state_mut(|st| {
                st.metrics_enabled = false;
                for node in st.nodes.values_mut() {
                    if let Some(link) = node.link.as_mut() {
                        link.notify(AgentOp::DisableMetrics);
                    }
                }
            });
            info!("metrics disabled");
            ClientReply::Ok
        }

        ClientRequest::Shutdown => {
            // Nodes fail every further call with the distinguished
            // shutdown error while the process winds down.
            ctx.lock_state_mut(|st| {
                for node in st.nodes.values_mut() {
                    node.shutdown = true;
                }
            });
            ctx.shutdown.notify_one();
            ClientReply::ShuttingDown
        }

        // Intercepted in client_connection before reaching here.
        ClientRequest::CreateMonitor
        | ClientRequest::Listen
        | ClientRequest::MonitorListen { .. } => unreachable!(),
    }
}

async fn handle_node_op(ctx: &Ctx, name: &str, op: NodeOp) -> ClientReply {
    let lifecycle = match &op {
        NodeOp::StartUnit { unit, mode } => Some((JobType::Start, unit.clone(), mode.clone())),
        NodeOp::StopUnit { unit, mode } => Some((JobType::Stop, unit.clone(), mode.clone())),
        NodeOp::RestartUnit { unit, mode } => {
            Some((JobType::Restart, unit.clone(), mode.clone()))
        }
        NodeOp::ReloadUnit { unit, mode } => Some((JobType::Reload, unit.clone(), mode.clone())),
        _ => None,
    };

    if let Some((ty, unit, mode)) = lifecycle {
        return match node::lifecycle(ctx, name, ty, &unit, &mode).await {
            Ok((id, path)) => ClientReply::Job { id, path },
            Err(error) => ClientReply::err(error),
        };
    }

    match node::pass_through(ctx, name, op).await {
        Ok(OpResult::Units { units }) => ClientReply::Units { units },
        Ok(OpResult::UnitFiles { files }) => ClientReply::UnitFiles { files },
        Ok(OpResult::Properties { props }) => ClientReply::Properties { props },
        Ok(OpResult::Property { value }) => ClientReply::Property { value },
        Ok(OpResult::UnitFileChanges { carries_install_info, changes }) => {
            ClientReply::UnitFileChanges { carries_install_info, changes }
        }
        Ok(_) => ClientReply::Ok,
        Err(error) => ClientReply::err(error),
    }
}

// -- monitor owner connections --

async fn monitor_connection<R, W>(mut reader: R, mut writer: W, ctx: Ctx)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let (monitor_id, path) = ctx.lock_state_mut(|st| monitor::create_monitor(st, tx.clone()));
    info!(monitor = %monitor_id, "monitor created");

    if write_frame(&mut writer, &ClientReply::Monitor { id: monitor_id, path }, ipc_timeout())
        .await
        .is_err()
    {
        ctx.lock_state_mut(|st| monitor::close_monitor(st, monitor_id));
        return;
    }

    let cancel = CancellationToken::new();
    let writer_task = tokio::spawn(pump_frames(writer, rx, cancel.clone()));

    loop {
        let request: MonitorRequest = tokio::select! {
            _ = cancel.cancelled() => break,
            res = read_frame_wait(&mut reader) => match res {
                Ok(request) => request,
                Err(_) => break,
            },
        };
        let reply = handle_monitor_request(&ctx, monitor_id, request);
        let done = matches!(reply, Some(MonitorFrame::Closed) | None);
        if let Some(frame) = reply {
            let _ = tx.send(frame);
        }
        if done {
            break;
        }
    }

    cancel.cancel();
    // Owner disconnect (or Close): tear everything down. Idempotent
    // when Close already ran.
    ctx.lock_state_mut(|st| monitor::close_monitor(st, monitor_id));
    let _ = writer_task.await;
}

/// Handle one monitor request; `None` means the connection is done and
/// the Close path already queued its final frame.
fn handle_monitor_request(
    ctx: &Ctx,
    monitor_id: MonitorId,
    request: MonitorRequest,
) -> Option<MonitorFrame> {
    match request {
        MonitorRequest::Subscribe { node, unit } => Some(ctx.lock_state_mut(|st| {
            match monitor::subscribe(st, monitor_id, &node, vec![unit]) {
                Ok(id) => MonitorFrame::Subscribed { id },
                Err(error) => MonitorFrame::Error { error },
            }
        })),
        MonitorRequest::SubscribeList { node, units } => Some(ctx.lock_state_mut(|st| {
            match monitor::subscribe(st, monitor_id, &node, units) {
                Ok(id) => MonitorFrame::Subscribed { id },
                Err(error) => MonitorFrame::Error { error },
            }
        })),
        MonitorRequest::Unsubscribe { id } => Some(ctx.lock_state_mut(|st| {
            monitor::unsubscribe(st, monitor_id, id);
            MonitorFrame::Unsubscribed
        })),
        MonitorRequest::AddPeer { name } => Some(ctx.lock_state_mut(|st| {
            match monitor::add_peer(st, monitor_id, &name) {
                Ok(id) => MonitorFrame::PeerAdded { id },
                Err(error) => MonitorFrame::Error { error },
            }
        })),
        MonitorRequest::RemovePeer { id, reason } => Some(ctx.lock_state_mut(|st| {
            match monitor::remove_peer(st, monitor_id, id, &reason) {
                Ok(()) => MonitorFrame::PeerRemoved { reason },
                Err(error) => MonitorFrame::Error { error },
            }
        })),
        MonitorRequest::Close => {
            ctx.lock_state_mut(|st| monitor::close_monitor(st, monitor_id));
            None
        }
    }
}

// -- signal listener connections --

async fn listen_connection<R, W>(mut reader: R, mut writer: W, ctx: Ctx)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    if write_frame(&mut writer, &ClientReply::Listening, ipc_timeout()).await.is_err() {
        return;
    }
    let id = ctx.lock_state_mut(|st| st.add_listener(tx));
    let cancel = CancellationToken::new();
    let writer_task = tokio::spawn(pump_frames(writer, rx, cancel.clone()));

    // Listeners only receive; reads detect disconnect.
    loop {
        let res: Result<serde_json::Value, _> = tokio::select! {
            _ = cancel.cancelled() => break,
            res = read_frame_wait(&mut reader) => res,
        };
        if res.is_err() {
            break;
        }
    }

    cancel.cancel();
    ctx.lock_state_mut(|st| st.remove_listener(id));
    let _ = writer_task.await;
}

// -- monitor peer connections --

async fn peer_connection<R, W>(mut reader: R, mut writer: W, peer: String, ctx: Ctx)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    if !herd_core::is_valid_peer_name(&peer) {
        let reply =
            ClientReply::err(WireError::invalid_args(format!("invalid peer name: {peer}")));
        let _ = write_frame(&mut writer, &reply, ipc_timeout()).await;
        return;
    }
    let (tx, rx) = mpsc::unbounded_channel();
    let claimed = ctx.lock_state_mut(|st| {
        if st.peer_channels.contains_key(&peer) {
            false
        } else {
            st.peer_channels.insert(peer.clone(), tx);
            true
        }
    });
    if !claimed {
        let reply = ClientReply::err(WireError::new(
            ErrCode::AddressInUse,
            format!("peer name already claimed: {peer}"),
        ));
        let _ = write_frame(&mut writer, &reply, ipc_timeout()).await;
        return;
    }
    if write_frame(&mut writer, &ClientReply::Listening, ipc_timeout()).await.is_err() {
        ctx.lock_state_mut(|st| {
            st.peer_channels.remove(&peer);
        });
        return;
    }

    let cancel = CancellationToken::new();
    let writer_task = tokio::spawn(pump_frames(writer, rx, cancel.clone()));

    loop {
        let res: Result<serde_json::Value, _> = tokio::select! {
            _ = cancel.cancelled() => break,
            res = read_frame_wait(&mut reader) => res,
        };
        if res.is_err() {
            break;
        }
    }

    cancel.cancel();
    ctx.lock_state_mut(|st| {
        st.peer_channels.remove(&peer);
    });
    let _ = writer_task.await;
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
