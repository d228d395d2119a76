// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use super::*;
use yare::parameterized;

#[parameterized(
    plain = { "hello.service", "/org/freedesktop/systemd1/unit/hello_2eservice" },
    dash = { "my-app.service", "/org/freedesktop/systemd1/unit/my_2dapp_2eservice" },
    template = { "herd-dep@db.service", "/org/freedesktop/systemd1/unit/herd_2ddep_40db_2eservice" },
)]
fn unit_paths_escape_like_systemd(unit: &str, path: &str) {
    assert_eq!(unit_object_path(unit), path);
    assert_eq!(unit_name_from_path(path).as_deref(), Some(unit));
}

#[test]
fn unit_name_rejects_foreign_paths() {
    assert_eq!(unit_name_from_path("/org/freedesktop/systemd1/job/1"), None);
    assert_eq!(unit_name_from_path("/org/freedesktop/systemd1/unit/bad_zz"), None);
}

#[tokio::test]
async fn fake_systemd_scripts_states_and_events() {
    let fake = FakeSystemd::new();
    fake.set_unit_state("a.service", herd_core::ActiveState::Active, "running");

    let state = fake.get_unit_state("a.service").await.unwrap();
    assert_eq!(state, (herd_core::ActiveState::Active, "running".to_string()));
    assert!(fake.get_unit_state("ghost.service").await.is_err());

    let mut rx = fake.subscribe_events().await.unwrap();
    fake.emit(SystemdEvent::UnitNew {
        name: "a.service".to_string(),
        path: unit_object_path("a.service"),
    });
    assert!(matches!(rx.recv().await, Some(SystemdEvent::UnitNew { .. })));
}
