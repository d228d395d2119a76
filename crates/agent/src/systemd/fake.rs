// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Scriptable systemd stand-in for tests.

use super::{SystemdError, SystemdEvent, SystemdManager, UnitFileChanges};
use async_trait::async_trait;
use herd_core::unit::UnitProperties;
use herd_core::{ActiveState, UnitFileInfo, UnitInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    /// Scripted `(active, sub)` per loaded unit.
    states: HashMap<String, (ActiveState, String)>,
    /// Units whose lifecycle methods fail.
    broken: HashMap<String, String>,
    /// Recorded calls, e.g. `start:web.service:replace`.
    calls: Vec<String>,
    event_tx: Option<mpsc::UnboundedSender<SystemdEvent>>,
    job_seq: u32,
}

/// Fake [`SystemdManager`] with scripted unit states, recorded calls,
/// and a hand-cranked event stream.
#[derive(Clone, Default)]
pub struct FakeSystemd {
    inner: Arc<Mutex<Inner>>,
}

impl FakeSystemd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a loaded unit's current state.
    pub fn set_unit_state(&self, unit: &str, active: ActiveState, sub: &str) {
        self.inner.lock().states.insert(unit.to_string(), (active, sub.to_string()));
    }

    /// Make lifecycle methods fail for `unit`.
    pub fn break_unit(&self, unit: &str, message: &str) {
        self.inner.lock().broken.insert(unit.to_string(), message.to_string());
    }

    /// Push an event to whoever subscribed.
    pub fn emit(&self, event: SystemdEvent) {
        let tx = self.inner.lock().event_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(event);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// The job path the next lifecycle call will return.
    pub fn next_job_path(&self) -> String {
        let seq = self.inner.lock().job_seq + 1;
        format!("/org/freedesktop/systemd1/job/{seq}")
    }

    fn lifecycle(&self, kind: &str, unit: &str, mode: &str) -> Result<String, SystemdError> {
        let mut inner = self.inner.lock();
        inner.calls.push(format!("{kind}:{unit}:{mode}"));
        if let Some(message) = inner.broken.get(unit) {
            return Err(SystemdError::Bus(message.clone()));
        }
        inner.job_seq += 1;
        Ok(format!("/org/freedesktop/systemd1/job/{}", inner.job_seq))
    }

    fn record(&self, call: String) {
        self.inner.lock().calls.push(call);
    }
}

#[async_trait]
impl SystemdManager for FakeSystemd {
    async fn start_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError> {
        self.lifecycle("start", unit, mode)
    }

    async fn stop_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError> {
        self.lifecycle("stop", unit, mode)
    }

    async fn restart_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError> {
        self.lifecycle("restart", unit, mode)
    }

    async fn reload_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError> {
        self.lifecycle("reload", unit, mode)
    }

    async fn cancel_job(&self, job_path: &str) -> Result<(), SystemdError> {
        self.record(format!("cancel:{job_path}"));
        Ok(())
    }

    async fn list_units(&self) -> Result<Vec<UnitInfo>, SystemdError> {
        let inner = self.inner.lock();
        let mut units: Vec<UnitInfo> = inner
            .states
            .iter()
            .map(|(name, (active, sub))| UnitInfo {
                name: name.clone(),
                description: String::new(),
                load_state: "loaded".to_string(),
                active_state: *active,
                sub_state: sub.clone(),
            })
            .collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    async fn list_unit_files(&self) -> Result<Vec<UnitFileInfo>, SystemdError> {
        Ok(vec![])
    }

    async fn get_unit_state(&self, unit: &str) -> Result<(ActiveState, String), SystemdError> {
        self.inner
            .lock()
            .states
            .get(unit)
            .cloned()
            .ok_or_else(|| SystemdError::NoSuchUnit(unit.to_string()))
    }

    async fn get_unit_properties(
        &self,
        unit: &str,
        _interface: &str,
    ) -> Result<UnitProperties, SystemdError> {
        let (active, sub) = self.get_unit_state(unit).await?;
        let mut props = UnitProperties::new();
        props.insert("ActiveState".to_string(), serde_json::json!(active.to_string()));
        props.insert("SubState".to_string(), serde_json::json!(sub));
        Ok(props)
    }

    async fn get_unit_property(
        &self,
        unit: &str,
        interface: &str,
        property: &str,
    ) -> Result<serde_json::Value, SystemdError> {
        let props = self.get_unit_properties(unit, interface).await?;
        props
            .get(property)
            .cloned()
            .ok_or_else(|| SystemdError::Bus(format!("no such property: {property}")))
    }

    async fn set_unit_properties(
        &self,
        unit: &str,
        runtime: bool,
        _props: UnitProperties,
    ) -> Result<(), SystemdError> {
        self.record(format!("set_properties:{unit}:{runtime}"));
        Ok(())
    }

    async fn freeze_unit(&self, unit: &str) -> Result<(), SystemdError> {
        self.record(format!("freeze:{unit}"));
        Ok(())
    }

    async fn thaw_unit(&self, unit: &str) -> Result<(), SystemdError> {
        self.record(format!("thaw:{unit}"));
        Ok(())
    }

    async fn kill_unit(&self, unit: &str, whom: &str, signal: i32) -> Result<(), SystemdError> {
        self.record(format!("kill:{unit}:{whom}:{signal}"));
        Ok(())
    }

    async fn reset_failed(&self, unit: Option<&str>) -> Result<(), SystemdError> {
        self.record(format!("reset_failed:{}", unit.unwrap_or("*")));
        Ok(())
    }

    async fn enable_unit_files(
        &self,
        files: &[String],
        runtime: bool,
        _force: bool,
    ) -> Result<(bool, UnitFileChanges), SystemdError> {
        self.record(format!("enable:{}:{runtime}", files.join(",")));
        Ok((false, vec![]))
    }

    async fn disable_unit_files(
        &self,
        files: &[String],
        runtime: bool,
    ) -> Result<UnitFileChanges, SystemdError> {
        self.record(format!("disable:{}:{runtime}", files.join(",")));
        Ok(vec![])
    }

    async fn daemon_reload(&self) -> Result<(), SystemdError> {
        self.record("daemon_reload".to_string());
        Ok(())
    }

    async fn subscribe_events(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<SystemdEvent>, SystemdError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().event_tx = Some(tx);
        Ok(rx)
    }
}
