// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use clap::Parser;
use herd_agent::config::AgentConfig;
use herd_agent::systemd::ZbusSystemd;
use herd_agent::{api, connection, core, lifecycle, logging, AgentCtx};
use herd_core::SystemClock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "herd-agent", about = "herd node agent daemon")]
struct Args {
    /// Path to the agent config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node name to register as
    #[arg(short, long)]
    name: Option<String>,

    /// Controller host to connect to
    #[arg(long)]
    host: Option<String>,

    /// Controller port to connect to
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> std::process::ExitCode {
    let args = Args::parse();

    let mut config = match AgentConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("herd-agent: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    if let Some(name) = args.name {
        config.node_name = name;
    }
    if let Some(host) = args.host {
        config.controller_host = host;
    }
    if let Some(port) = args.port {
        config.controller_port = port;
    }
    if let Err(e) = config.require_node_name() {
        eprintln!("herd-agent: {e}");
        return std::process::ExitCode::FAILURE;
    }

    let log = logging::init(config.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let systemd = match ZbusSystemd::new().await {
            Ok(systemd) => Arc::new(systemd),
            Err(e) => {
                error!("failed to connect to systemd: {}", e);
                return std::process::ExitCode::FAILURE;
            }
        };

        let startup = match lifecycle::startup(&config) {
            Ok(startup) => startup,
            Err(e) => {
                error!("startup failed: {}", e);
                return std::process::ExitCode::FAILURE;
            }
        };

        let mut ctx = AgentCtx::new(config.clone(), Arc::new(SystemClock::new()), systemd);
        ctx.log = Some(log);

        tokio::spawn(api::run(startup.local, ctx.clone()));
        tokio::spawn(connection::run(ctx.clone()));
        let events_ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = core::run_systemd_events(events_ctx).await {
                error!("systemd event stream failed: {}", e);
            }
        });

        wait_for_shutdown(&ctx).await;
        lifecycle::shutdown(&config);
        std::process::ExitCode::SUCCESS
    })
}

async fn wait_for_shutdown(ctx: &AgentCtx) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(e) => {
            error!("failed to install SIGTERM handler: {}", e);
            ctx.shutdown.notified().await;
            return;
        }
    };
    tokio::select! {
        _ = ctx.shutdown.notified() => info!("shutdown requested"),
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}
