// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

use super::*;
use crate::testing::{attach_listener, drain, test_ctx};
use herd_core::{JobId, JobState, JobType};
use herd_wire::ControllerSignal;

fn sample_job(id: u32) -> Job {
    Job::new(JobId::new(id), "n1".to_string(), "web.service".to_string(), JobType::Start, 100)
}

#[test]
fn register_job_announces_job_new() {
    let (ctx, _clock) = test_ctx();
    let mut signals = attach_listener(&ctx);

    let path = ctx.lock_state_mut(|st| register_job(st, sample_job(1)));
    assert_eq!(path, "/herd/job/1");

    let seen = drain(&mut signals);
    assert!(matches!(
        &seen[..],
        [ControllerSignal::JobNew { id, path, node, unit }]
            if *id == JobId::new(1) && path == "/herd/job/1" && node == "n1" && unit == "web.service"
    ));
}

#[test]
fn state_change_updates_registry_and_signals() {
    let (ctx, _clock) = test_ctx();
    ctx.lock_state_mut(|st| register_job(st, sample_job(1)));
    let mut signals = attach_listener(&ctx);

    ctx.lock_state_mut(|st| handle_job_state_changed(st, JobId::new(1), JobState::Running));

    ctx.lock_state(|st| {
        assert_eq!(st.jobs.get(&JobId::new(1)).unwrap().state, JobState::Running);
    });
    assert!(drain(&mut signals).iter().any(|s| matches!(
        s,
        ControllerSignal::JobStateChanged { state: JobState::Running, .. }
    )));
}

#[test]
fn job_done_removes_and_emits_terminal_signal() {
    let (ctx, _clock) = test_ctx();
    ctx.lock_state_mut(|st| register_job(st, sample_job(1)));
    let mut signals = attach_listener(&ctx);

    ctx.lock_state_mut(|st| handle_job_done(st, JobId::new(1), "done", 1_500));

    ctx.lock_state(|st| assert!(st.jobs.is_empty()));
    let seen = drain(&mut signals);
    assert!(seen.iter().any(|s| matches!(
        s,
        ControllerSignal::JobRemoved { result, .. } if result == "done"
    )));
    // Metrics are off by default.
    assert!(!seen.iter().any(|s| matches!(s, ControllerSignal::StartUnitJobMetrics { .. })));
}

#[test]
fn job_done_emits_metrics_when_enabled() {
    let (ctx, _clock) = test_ctx();
    ctx.lock_state_mut(|st| {
        st.metrics_enabled = true;
        register_job(st, sample_job(1));
    });
    let mut signals = attach_listener(&ctx);

    ctx.lock_state_mut(|st| handle_job_done(st, JobId::new(1), "done", 1_500));

    assert!(drain(&mut signals).iter().any(|s| matches!(
        s,
        ControllerSignal::StartUnitJobMetrics { elapsed_us: 1_400, .. }
    )));
}

#[test]
fn unknown_job_events_are_ignored() {
    let (ctx, _clock) = test_ctx();
    let mut signals = attach_listener(&ctx);
    ctx.lock_state_mut(|st| {
        handle_job_state_changed(st, JobId::new(9), JobState::Running);
        handle_job_done(st, JobId::new(9), "done", 0);
    });
    assert!(drain(&mut signals).is_empty());
}

#[test]
fn node_sweep_cancels_jobs_with_shutdown_result() {
    let (ctx, _clock) = test_ctx();
    ctx.lock_state_mut(|st| {
        register_job(st, sample_job(1));
        register_job(
            st,
            Job::new(JobId::new(2), "n2".to_string(), "db.service".to_string(), JobType::Stop, 0),
        );
    });
    let mut signals = attach_listener(&ctx);

    ctx.lock_state_mut(|st| node_jobs_sweep(st, "n1"));

    ctx.lock_state(|st| {
        assert!(!st.jobs.contains_key(&JobId::new(1)));
        assert!(st.jobs.contains_key(&JobId::new(2)));
    });
    let seen = drain(&mut signals);
    assert!(seen.iter().any(|s| matches!(
        s,
        ControllerSignal::JobRemoved { id, result, .. }
            if *id == JobId::new(1) && result == RESULT_CANCELLED_SHUTDOWN
    )));
}
