// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Controller link: connect, register, heartbeat, reconnect.
//!
//! `DISCONNECTED → CONNECTED` on successful Register; `CONNECTED →
//! RETRY` when the peer drops; `RETRY → CONNECTED` on the next
//! successful reconnect. The heartbeat interval paces both the
//! liveness tick while connected and the reconnect attempts while
//! retrying. Hostnames are re-resolved on every attempt, so a DNS
//! change is picked up without a restart.

use crate::core::{self, AgentCtx, LinkState};
use crate::proxy;
use herd_wire::{
    read_frame, read_frame_wait, write_frame, AgentMessage, ControllerMessage, Hello, OpResult,
    ProtocolError, WireError,
};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connect failed: {0}")]
    Connect(std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("registration rejected: {0}")]
    Rejected(WireError),

    #[error("unexpected registration reply")]
    BadRegisterReply,
}

trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

/// Run the link for the life of the process.
pub async fn run(ctx: AgentCtx) {
    loop {
        match session(&ctx).await {
            Ok(()) => info!("controller link closed"),
            Err(e) => debug!("controller link failed: {}", e),
        }

        let now = ctx.clock.monotonic_us();
        ctx.lock_state_mut(|st| {
            if !matches!(st.link, LinkState::Retry { .. }) {
                st.link = LinkState::Retry { retry_count: 0, disconnect_us: now };
            }
        });

        tokio::time::sleep(ctx.config.heartbeat_interval).await;
        ctx.lock_state_mut(|st| {
            if let LinkState::Retry { retry_count, .. } = &mut st.link {
                *retry_count += 1;
            }
        });
    }
}

/// One connected session: handshake, then pump messages until the
/// stream dies.
async fn session(ctx: &AgentCtx) -> Result<(), ConnectionError> {
    let stream = connect(ctx).await?;
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Hello, then Register, then wait for the verdict.
    write_frame(
        &mut writer,
        &Hello::Agent { token: ctx.config.token.clone() },
        HANDSHAKE_TIMEOUT,
    )
    .await?;
    write_frame(
        &mut writer,
        &AgentMessage::Register { serial: 1, name: ctx.config.node_name.clone() },
        HANDSHAKE_TIMEOUT,
    )
    .await?;
    let reply: ControllerMessage = read_frame(&mut reader, HANDSHAKE_TIMEOUT).await?;
    match reply {
        ControllerMessage::Reply { serial: 1, result: OpResult::Ok } => {}
        ControllerMessage::Reply { serial: 1, result: OpResult::Err { error } } => {
            warn!("controller rejected registration: {}", error);
            return Err(ConnectionError::Rejected(error));
        }
        other => {
            debug!("unexpected register reply: {:?}", other);
            return Err(ConnectionError::BadRegisterReply);
        }
    }

    info!(node = %ctx.config.node_name, controller = %ctx.controller_address(), "registered");
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    ctx.lock_state_mut(|st| {
        st.link = LinkState::Connected { tx: tx.clone(), cancel: cancel.clone() }
    });
    proxy::announce_pending(ctx);

    let writer_task = tokio::spawn(write_loop(writer, rx, cancel.clone()));
    let heartbeat_task =
        tokio::spawn(heartbeat_loop(tx, ctx.config.heartbeat_interval, cancel.clone()));

    let result = read_loop(ctx, &mut reader, &cancel).await;

    cancel.cancel();
    let _ = writer_task.await;
    let _ = heartbeat_task.await;
    result
}

async fn read_loop<S>(
    ctx: &AgentCtx,
    reader: &mut ReadHalf<S>,
    cancel: &CancellationToken,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let msg: ControllerMessage = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = read_frame_wait(reader) => match res {
                Ok(msg) => msg,
                Err(ProtocolError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            },
        };
        core::handle_controller_message(ctx, msg).await;
    }
}

async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut rx: mpsc::UnboundedReceiver<AgentMessage>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if write_frame(&mut writer, &msg, HANDSHAKE_TIMEOUT).await.is_err() {
            cancel.cancel();
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Emit a liveness tick every interval while connected.
async fn heartbeat_loop(
    tx: mpsc::UnboundedSender<AgentMessage>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so the register reply
    // counts as the initial liveness proof.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if tx.send(AgentMessage::Heartbeat).is_err() {
                    break;
                }
            }
        }
    }
}

async fn connect(ctx: &AgentCtx) -> Result<Box<dyn PeerStream>, ConnectionError> {
    if let Some(path) = &ctx.config.controller_socket {
        let stream = UnixStream::connect(path).await.map_err(ConnectionError::Connect)?;
        return Ok(Box::new(stream));
    }
    let addr = (ctx.config.controller_host.as_str(), ctx.config.controller_port);
    let stream = TcpStream::connect(addr).await.map_err(ConnectionError::Connect)?;
    Ok(Box::new(stream))
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
