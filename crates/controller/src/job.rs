// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Job registry: one record per pending unit lifecycle operation.
//!
//! A job is either in the registry and announced via `JobNew`, or it
//! never existed as far as clients are concerned. Removal always emits
//! the terminal `JobRemoved` signal.

use crate::state::ControllerState;
use herd_core::{JobId, JobState, JobType};
use herd_wire::ControllerSignal;
use tracing::{debug, warn};

/// Result string for jobs whose node vanished.
pub const RESULT_CANCELLED_SHUTDOWN: &str = "cancelled due to shutdown";

/// One pending unit lifecycle operation on one node.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub node: String,
    pub unit: String,
    pub job_type: JobType,
    pub state: JobState,
    pub start_us: u64,
}

impl Job {
    pub fn new(id: JobId, node: String, unit: String, job_type: JobType, start_us: u64) -> Self {
        Self { id, node, unit, job_type, state: JobState::Waiting, start_us }
    }

    pub fn path(id: JobId) -> String {
        format!("/herd/job/{id}")
    }
}

/// Publish a job: insert it and announce `JobNew`. Returns the
/// exported path.
pub fn register_job(st: &mut ControllerState, job: Job) -> String {
    let path = Job::path(job.id);
    let signal = ControllerSignal::JobNew {
        id: job.id,
        path: path.clone(),
        node: job.node.clone(),
        unit: job.unit.clone(),
    };
    st.jobs.insert(job.id, job);
    st.broadcast(signal);
    path
}

/// Agent reported mid-lifecycle progress.
pub fn handle_job_state_changed(st: &mut ControllerState, id: JobId, state: JobState) {
    let Some(job) = st.jobs.get_mut(&id) else {
        debug!(job = %id, "state change for unknown job");
        return;
    };
    job.state = state;
    st.broadcast(ControllerSignal::JobStateChanged { id, state });
}

/// Agent reported the terminal result: remove the job and emit
/// `JobRemoved`, plus timing metrics when enabled.
pub fn handle_job_done(st: &mut ControllerState, id: JobId, result: &str, now_us: u64) {
    let Some(job) = st.jobs.remove(&id) else {
        warn!(job = %id, "completion for unknown job");
        return;
    };
    st.broadcast(ControllerSignal::JobRemoved {
        id,
        path: Job::path(id),
        node: job.node.clone(),
        unit: job.unit.clone(),
        result: result.to_string(),
    });
    if st.metrics_enabled {
        st.broadcast(ControllerSignal::StartUnitJobMetrics {
            node: job.node,
            job: id,
            elapsed_us: now_us.saturating_sub(job.start_us),
        });
    }
}

/// Remove every job bound to a disconnected node with a synthetic
/// cancellation result.
pub fn node_jobs_sweep(st: &mut ControllerState, node: &str) {
    let ids: Vec<JobId> =
        st.jobs.values().filter(|j| j.node == node).map(|j| j.id).collect();
    for id in ids {
        if let Some(job) = st.jobs.remove(&id) {
            st.broadcast(ControllerSignal::JobRemoved {
                id,
                path: Job::path(id),
                node: job.node,
                unit: job.unit,
                result: RESULT_CANCELLED_SHUTDOWN.to_string(),
            });
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
