// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Runtime-adjustable log level.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid log level: {0}")]
pub struct ParseLevelError(pub String);

/// Log verbosity accepted by `SetLogLevel` on both daemons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

crate::string_enum! {
    LogLevel, ParseLevelError {
        Debug => "DEBUG",
        Info => "INFO",
        Warn => "WARN",
        Error => "ERROR",
    }
}

#[cfg(test)]
#[path = "level_tests.rs"]
mod tests;
