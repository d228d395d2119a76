// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Tracing setup with a runtime-reloadable level filter.

use herd_core::LogLevel;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

/// Handle through which `SetLogLevel` adjusts the live filter.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    pub fn set_level(&self, level: LogLevel) {
        let filter = EnvFilter::new(directive(level));
        if let Err(e) = self.handle.reload(filter) {
            tracing::warn!("failed to reload log filter: {}", e);
        }
    }
}

/// Initialize the global subscriber. `RUST_LOG` wins over the
/// configured level when set.
pub fn init(level: LogLevel) -> LogHandle {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(level)));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    LogHandle { handle }
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}
