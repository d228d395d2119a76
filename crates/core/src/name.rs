// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Name validation for nodes, units, and monitor peers.

/// The wildcard name, expanding to "all currently-known and future
/// members" wherever a node or unit name is accepted.
pub const WILDCARD: &str = "*";

const MAX_NAME_LEN: usize = 255;

/// A node name is a non-empty hostname-like label: alphanumerics,
/// `-`, `_`, and `.`, at most 255 bytes. The wildcard is not a valid
/// node name; it is accepted only where expansion is meaningful.
pub fn is_valid_node_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// A unit name is `<prefix>.<suffix>` where the suffix is a known unit
/// type word. Template instances (`foo@bar.service`) pass.
pub fn is_valid_unit_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let Some((prefix, suffix)) = name.rsplit_once('.') else {
        return false;
    };
    if prefix.is_empty() {
        return false;
    }
    matches!(
        suffix,
        "service"
            | "socket"
            | "device"
            | "mount"
            | "automount"
            | "swap"
            | "target"
            | "path"
            | "timer"
            | "slice"
            | "scope"
    )
}

/// Peer names follow bus-name rules: two or more dot-separated elements
/// of `[A-Za-z0-9_-]`, none starting with a digit, at most 255 bytes.
pub fn is_valid_peer_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let elements: Vec<&str> = name.split('.').collect();
    if elements.len() < 2 {
        return false;
    }
    elements.iter().all(|e| {
        !e.is_empty()
            && !e.starts_with(|c: char| c.is_ascii_digit())
            && e.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    })
}

#[cfg(test)]
#[path = "name_tests.rs"]
mod tests;
