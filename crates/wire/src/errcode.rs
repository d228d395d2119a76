// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Distinguished protocol error codes.

use herd_core::unit::ParseStateError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code carried on the wire alongside a human-readable message.
///
/// Policy failures map to `ServiceUnknown`/`AddressInUse`/`InvalidArgs`;
/// cancellation sweeps synthesize `RequestCancelled`; everything the
/// taxonomy doesn't distinguish lands on `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrCode {
    ServiceUnknown,
    AddressInUse,
    InvalidArgs,
    Shutdown,
    RequestCancelled,
    NotFound,
    AlreadySubscribed,
    NoMemory,
    Failed,
}

herd_core::string_enum! {
    ErrCode, ParseStateError {
        ServiceUnknown => "service_unknown",
        AddressInUse => "address_in_use",
        InvalidArgs => "invalid_args",
        Shutdown => "shutdown",
        RequestCancelled => "request_cancelled",
        NotFound => "not_found",
        AlreadySubscribed => "already_subscribed",
        NoMemory => "no_memory",
        Failed => "failed",
    }
}

/// A protocol-visible failure: code + message, forwarded verbatim to
/// whoever is waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct WireError {
    pub code: ErrCode,
    pub message: String,
}

impl WireError {
    pub fn new(code: ErrCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrCode::Failed, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ErrCode::InvalidArgs, message)
    }

    /// The synthetic error delivered to every outstanding request when
    /// its node disconnects.
    pub fn cancelled() -> Self {
        Self::new(ErrCode::RequestCancelled, "Request cancelled")
    }

    pub fn shutdown() -> Self {
        Self::new(ErrCode::Shutdown, "Request not allowed: node is in shutdown state")
    }
}

#[cfg(test)]
#[path = "errcode_tests.rs"]
mod tests;
