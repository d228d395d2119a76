// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Local api socket for proxy helpers and operator tooling.
//!
//! Requests are one frame in, one frame out. `CreateProxy` replies are
//! held until the proxy's target state is determined — deliberately no
//! timeout, readiness may take arbitrarily long.

use crate::core::{self, AgentCtx};
use crate::proxy;
use herd_wire::{read_frame, write_frame, LocalReply, LocalRequest, ProtocolError, WireError};
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

fn ipc_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Accept local connections until the process exits.
pub async fn run(listener: UnixListener, ctx: AgentCtx) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_connection(stream, ctx).await;
                });
            }
            Err(e) => error!("local accept error: {}", e),
        }
    }
}

async fn handle_connection(mut stream: UnixStream, ctx: AgentCtx) {
    let request: LocalRequest = match read_frame(&mut stream, ipc_timeout()).await {
        Ok(request) => request,
        Err(ProtocolError::ConnectionClosed) => return,
        Err(e) => {
            debug!("bad local request: {}", e);
            return;
        }
    };
    debug!(request = ?request, "local request");

    let reply = match request {
        LocalRequest::CreateProxy { local_service, node, unit } => {
            match proxy::create_proxy(&ctx, &local_service, &node, &unit) {
                // Held until readiness; a dropped sender means the
                // proxy was torn down before resolving.
                Ok(rx) => rx.await.unwrap_or_else(|_| LocalReply::Error {
                    error: WireError::failed("proxy torn down"),
                }),
                Err(error) => LocalReply::Error { error },
            }
        }

        LocalRequest::RemoveProxy { local_service, node, unit } => {
            proxy::remove_proxy(&ctx, &local_service, &node, &unit);
            LocalReply::Ok
        }

        LocalRequest::Status => LocalReply::Status { status: core::status_info(&ctx) },

        LocalRequest::SetLogLevel { level } => match level.parse() {
            Ok(level) => {
                if let Some(log) = &ctx.log {
                    log.set_level(level);
                }
                info!(level = %level, "log level changed");
                LocalReply::Ok
            }
            Err(_) => LocalReply::Error {
                error: WireError::invalid_args(format!("invalid log level: {level}")),
            },
        },
    };

    if let Err(e) = write_frame(&mut stream, &reply, ipc_timeout()).await {
        debug!("failed to write local reply: {}", e);
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
