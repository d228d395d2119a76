// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use super::*;
use yare::parameterized;

#[parameterized(
    service_unknown = { ErrCode::ServiceUnknown, "service_unknown" },
    address_in_use = { ErrCode::AddressInUse, "address_in_use" },
    invalid_args = { ErrCode::InvalidArgs, "invalid_args" },
    shutdown = { ErrCode::Shutdown, "shutdown" },
    cancelled = { ErrCode::RequestCancelled, "request_cancelled" },
)]
fn codes_display_their_wire_string(code: ErrCode, s: &str) {
    assert_eq!(code.to_string(), s);
    assert_eq!(s.parse::<ErrCode>().unwrap(), code);
}

#[test]
fn cancelled_error_has_fixed_message() {
    let err = WireError::cancelled();
    assert_eq!(err.code, ErrCode::RequestCancelled);
    assert_eq!(err.message, "Request cancelled");
}

#[test]
fn error_display_includes_code_and_message() {
    let err = WireError::new(ErrCode::ServiceUnknown, "no such node: n9");
    assert_eq!(err.to_string(), "service_unknown: no such node: n9");
}

#[test]
fn error_serializes_with_snake_case_code() {
    let err = WireError::invalid_args("bad mode");
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["code"], "invalid_args");
    assert_eq!(json["message"], "bad mode");
}
