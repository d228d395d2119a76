// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use clap::Parser;
use herd_controller::{config::Config, heartbeat, lifecycle, listener::Listener, logging, Ctx};
use herd_core::SystemClock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "herd-controller", about = "herd fleet controller daemon")]
struct Args {
    /// Path to the controller config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> std::process::ExitCode {
    let args = Args::parse();

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("herd-controller: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    let log = logging::init(config.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(async move {
        let startup = match lifecycle::startup(&config) {
            Ok(startup) => startup,
            Err(e) => {
                error!("startup failed: {}", e);
                return std::process::ExitCode::FAILURE;
            }
        };

        let mut ctx = Ctx::new(config.clone(), Arc::new(SystemClock::new()));
        ctx.log = Some(log);

        let mut listener = Listener::new(ctx.clone());
        if let Some(uds) = startup.uds {
            listener.add_uds(uds);
        }
        if let Some(tcp) = startup.tcp {
            listener.add_tcp(tcp);
        }
        for uds in startup.inherited_uds {
            listener.add_uds(uds);
        }
        for tcp in startup.inherited_tcp {
            listener.add_tcp(tcp);
        }
        tokio::spawn(listener.run());
        heartbeat::spawn(ctx.clone());

        wait_for_shutdown(&ctx).await;
        lifecycle::shutdown(&config);
        std::process::ExitCode::SUCCESS
    });

    code
}

async fn wait_for_shutdown(ctx: &Ctx) {
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
        _ = ctx.shutdown.notified() => info!("shutdown requested via api"),
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}
