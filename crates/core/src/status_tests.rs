// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use super::*;
use yare::parameterized;

#[parameterized(
    none_online = { 0, 3, SystemStatus::Down },
    some_online = { 1, 3, SystemStatus::Degraded },
    nearly_all = { 2, 3, SystemStatus::Degraded },
    all_online = { 3, 3, SystemStatus::Up },
    empty_fleet = { 0, 0, SystemStatus::Down },
)]
fn system_status_from_counts(online: usize, total: usize, expected: SystemStatus) {
    assert_eq!(SystemStatus::from_counts(online, total), expected);
}

#[test]
fn status_only_changes_on_boundary_crossings() {
    // Within the degraded band the derived status is stable, so a
    // change signal keyed on inequality fires only at 0↔1 and N-1↔N.
    let total = 5;
    let stati: Vec<SystemStatus> =
        (0..=total).map(|online| SystemStatus::from_counts(online, total)).collect();
    let changes =
        stati.windows(2).filter(|w| w[0] != w[1]).count();
    assert_eq!(changes, 2);
}

#[test]
fn node_status_round_trips() {
    assert_eq!(NodeStatus::Online.to_string(), "online");
    assert_eq!("offline".parse::<NodeStatus>().unwrap(), NodeStatus::Offline);
}
