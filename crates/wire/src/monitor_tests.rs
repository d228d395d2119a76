// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use super::*;
use herd_core::WILDCARD;

#[test]
fn subscribe_accepts_wildcards() {
    let req =
        MonitorRequest::Subscribe { node: WILDCARD.to_string(), unit: "a.service".to_string() };
    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["node"], "*");
}

#[test]
fn subscribe_list_round_trips() {
    let req = MonitorRequest::SubscribeList {
        node: "n1".to_string(),
        units: vec!["a.service".to_string(), "b.service".to_string()],
    };
    let json = serde_json::to_string(&req).unwrap();
    let back: MonitorRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(back, req);
}

#[test]
fn event_frame_nests_the_event() {
    let frame = MonitorFrame::Event {
        event: MonitorEvent::UnitRemoved {
            node: "n1".to_string(),
            unit: "a.service".to_string(),
            reason: EventReason::Virtual,
        },
    };
    let json = serde_json::to_value(&frame).unwrap();
    assert_eq!(json["type"], "event");
    assert_eq!(json["event"]["type"], "unit:removed");
    assert_eq!(json["event"]["reason"], "virtual");
}

#[test]
fn peer_removed_carries_reason() {
    let frame = MonitorFrame::PeerRemoved { reason: "superseded".to_string() };
    let json = serde_json::to_string(&frame).unwrap();
    let back: MonitorFrame = serde_json::from_str(&json).unwrap();
    assert_eq!(back, frame);
}
