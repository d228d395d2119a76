// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Production [`SystemdManager`] over D-Bus (org.freedesktop.systemd1).

use super::{
    unit_name_from_path, unit_object_path, SystemdError, SystemdEvent, SystemdManager,
    UnitFileChanges,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use herd_core::unit::UnitProperties;
use herd_core::{ActiveState, UnitFileInfo, UnitInfo};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::{dbus_proxy, MatchRule, MessageStream, MessageType};

/// Row shape of Manager.ListUnits.
type UnitListRow =
    (String, String, String, String, String, String, OwnedObjectPath, u32, String, OwnedObjectPath);

#[dbus_proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1",
    gen_blocking = false
)]
trait Manager {
    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn reload_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn get_unit(&self, name: &str) -> zbus::Result<OwnedObjectPath>;
    fn list_units(&self) -> zbus::Result<Vec<UnitListRow>>;
    fn list_unit_files(&self) -> zbus::Result<Vec<(String, String)>>;

    fn set_unit_properties(
        &self,
        name: &str,
        runtime: bool,
        properties: Vec<(String, Value<'static>)>,
    ) -> zbus::Result<()>;

    fn freeze_unit(&self, name: &str) -> zbus::Result<()>;
    fn thaw_unit(&self, name: &str) -> zbus::Result<()>;
    fn kill_unit(&self, name: &str, whom: &str, signal: i32) -> zbus::Result<()>;
    fn reset_failed(&self) -> zbus::Result<()>;
    fn reset_failed_unit(&self, name: &str) -> zbus::Result<()>;

    fn enable_unit_files(
        &self,
        files: Vec<String>,
        runtime: bool,
        force: bool,
    ) -> zbus::Result<(bool, UnitFileChanges)>;
    fn disable_unit_files(
        &self,
        files: Vec<String>,
        runtime: bool,
    ) -> zbus::Result<UnitFileChanges>;

    fn reload(&self) -> zbus::Result<()>;

    /// Ask systemd to emit change signals at all.
    fn subscribe(&self) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn unit_new(&self, id: String, unit: OwnedObjectPath) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn unit_removed(&self, id: String, unit: OwnedObjectPath) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn job_removed(
        &self,
        id: u32,
        job: OwnedObjectPath,
        unit: String,
        result: String,
    ) -> zbus::Result<()>;
}

/// systemd over the system bus.
pub struct ZbusSystemd {
    conn: zbus::Connection,
    manager: ManagerProxy<'static>,
}

impl ZbusSystemd {
    pub async fn new() -> Result<Self, SystemdError> {
        let conn = zbus::Connection::system().await.map_err(bus_err)?;
        let manager = ManagerProxy::new(&conn).await.map_err(bus_err)?;
        manager.subscribe().await.map_err(bus_err)?;
        Ok(Self { conn, manager })
    }

    async fn unit_properties_proxy(
        &self,
        unit: &str,
    ) -> Result<zbus::fdo::PropertiesProxy<'static>, SystemdError> {
        zbus::fdo::PropertiesProxy::builder(&self.conn)
            .destination("org.freedesktop.systemd1")
            .map_err(bus_err)?
            .path(unit_object_path(unit))
            .map_err(bus_err)?
            .build()
            .await
            .map_err(bus_err)
    }
}

fn bus_err(e: zbus::Error) -> SystemdError {
    if let zbus::Error::MethodError(ref name, ref message, _) = e {
        if name.as_str().ends_with("NoSuchUnit") {
            return SystemdError::NoSuchUnit(message.clone().unwrap_or_default());
        }
    }
    SystemdError::Bus(e.to_string())
}

fn fdo_err(e: zbus::fdo::Error) -> SystemdError {
    SystemdError::Bus(e.to_string())
}

fn parse_active(s: &str) -> ActiveState {
    s.parse().unwrap_or(ActiveState::Invalid)
}

/// Best-effort conversion of a zvariant value into JSON for the wire.
fn value_to_json(value: &Value<'_>) -> serde_json::Value {
    match value {
        Value::U8(v) => serde_json::json!(v),
        Value::Bool(v) => serde_json::json!(v),
        Value::I16(v) => serde_json::json!(v),
        Value::U16(v) => serde_json::json!(v),
        Value::I32(v) => serde_json::json!(v),
        Value::U32(v) => serde_json::json!(v),
        Value::I64(v) => serde_json::json!(v),
        Value::U64(v) => serde_json::json!(v),
        Value::F64(v) => serde_json::json!(v),
        Value::Str(v) => serde_json::json!(v.as_str()),
        Value::ObjectPath(v) => serde_json::json!(v.as_str()),
        Value::Signature(v) => serde_json::json!(v.as_str()),
        Value::Array(array) => {
            serde_json::Value::Array(array.iter().map(value_to_json).collect())
        }
        other => serde_json::json!(format!("{other:?}")),
    }
}

fn json_to_value(json: &serde_json::Value) -> Option<Value<'static>> {
    match json {
        serde_json::Value::Bool(v) => Some(Value::Bool(*v)),
        serde_json::Value::String(v) => Some(Value::Str(v.clone().into())),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Some(Value::U64(v))
            } else if let Some(v) = n.as_i64() {
                Some(Value::I64(v))
            } else {
                n.as_f64().map(Value::F64)
            }
        }
        _ => None,
    }
}

fn owned_props_to_wire(props: HashMap<String, OwnedValue>) -> UnitProperties {
    props.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect()
}

#[async_trait]
impl SystemdManager for ZbusSystemd {
    async fn start_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError> {
        Ok(self.manager.start_unit(unit, mode).await.map_err(bus_err)?.to_string())
    }

    async fn stop_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError> {
        Ok(self.manager.stop_unit(unit, mode).await.map_err(bus_err)?.to_string())
    }

    async fn restart_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError> {
        Ok(self.manager.restart_unit(unit, mode).await.map_err(bus_err)?.to_string())
    }

    async fn reload_unit(&self, unit: &str, mode: &str) -> Result<String, SystemdError> {
        Ok(self.manager.reload_unit(unit, mode).await.map_err(bus_err)?.to_string())
    }

    async fn cancel_job(&self, job_path: &str) -> Result<(), SystemdError> {
        self.conn
            .call_method(
                Some("org.freedesktop.systemd1"),
                job_path,
                Some("org.freedesktop.systemd1.Job"),
                "Cancel",
                &(),
            )
            .await
            .map_err(bus_err)?;
        Ok(())
    }

    async fn list_units(&self) -> Result<Vec<UnitInfo>, SystemdError> {
        let rows = self.manager.list_units().await.map_err(bus_err)?;
        Ok(rows
            .into_iter()
            .map(|(name, description, load_state, active_state, sub_state, ..)| UnitInfo {
                name,
                description,
                load_state,
                active_state: parse_active(&active_state),
                sub_state,
            })
            .collect())
    }

    async fn list_unit_files(&self) -> Result<Vec<UnitFileInfo>, SystemdError> {
        let rows = self.manager.list_unit_files().await.map_err(bus_err)?;
        Ok(rows.into_iter().map(|(path, state)| UnitFileInfo { path, state }).collect())
    }

    async fn get_unit_state(&self, unit: &str) -> Result<(ActiveState, String), SystemdError> {
        // GetUnit fails for units that are not loaded.
        self.manager.get_unit(unit).await.map_err(bus_err)?;
        let props = self.get_unit_properties(unit, "org.freedesktop.systemd1.Unit").await?;
        let active = props
            .get("ActiveState")
            .and_then(|v| v.as_str())
            .map(parse_active)
            .unwrap_or(ActiveState::Invalid);
        let sub = props
            .get("SubState")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok((active, sub))
    }

    async fn get_unit_properties(
        &self,
        unit: &str,
        interface: &str,
    ) -> Result<UnitProperties, SystemdError> {
        let proxy = self.unit_properties_proxy(unit).await?;
        let interface =
            zbus::names::InterfaceName::try_from(interface.to_string()).map_err(|e| {
                SystemdError::Bus(format!("bad interface name: {e}"))
            })?;
        let props = proxy.get_all(interface).await.map_err(fdo_err)?;
        Ok(owned_props_to_wire(props))
    }

    async fn get_unit_property(
        &self,
        unit: &str,
        interface: &str,
        property: &str,
    ) -> Result<serde_json::Value, SystemdError> {
        let proxy = self.unit_properties_proxy(unit).await?;
        let interface =
            zbus::names::InterfaceName::try_from(interface.to_string()).map_err(|e| {
                SystemdError::Bus(format!("bad interface name: {e}"))
            })?;
        let value = proxy.get(interface, property).await.map_err(fdo_err)?;
        Ok(value_to_json(&value))
    }

    async fn set_unit_properties(
        &self,
        unit: &str,
        runtime: bool,
        props: UnitProperties,
    ) -> Result<(), SystemdError> {
        let mut converted = Vec::with_capacity(props.len());
        for (name, value) in &props {
            let value = json_to_value(value)
                .ok_or_else(|| SystemdError::UnsupportedProperty(name.clone()))?;
            converted.push((name.clone(), value));
        }
        self.manager.set_unit_properties(unit, runtime, converted).await.map_err(bus_err)
    }

    async fn freeze_unit(&self, unit: &str) -> Result<(), SystemdError> {
        self.manager.freeze_unit(unit).await.map_err(bus_err)
    }

    async fn thaw_unit(&self, unit: &str) -> Result<(), SystemdError> {
        self.manager.thaw_unit(unit).await.map_err(bus_err)
    }

    async fn kill_unit(&self, unit: &str, whom: &str, signal: i32) -> Result<(), SystemdError> {
        self.manager.kill_unit(unit, whom, signal).await.map_err(bus_err)
    }

    async fn reset_failed(&self, unit: Option<&str>) -> Result<(), SystemdError> {
        match unit {
            Some(unit) => self.manager.reset_failed_unit(unit).await.map_err(bus_err),
            None => self.manager.reset_failed().await.map_err(bus_err),
        }
    }

    async fn enable_unit_files(
        &self,
        files: &[String],
        runtime: bool,
        force: bool,
    ) -> Result<(bool, UnitFileChanges), SystemdError> {
        self.manager
            .enable_unit_files(files.to_vec(), runtime, force)
            .await
            .map_err(bus_err)
    }

    async fn disable_unit_files(
        &self,
        files: &[String],
        runtime: bool,
    ) -> Result<UnitFileChanges, SystemdError> {
        self.manager.disable_unit_files(files.to_vec(), runtime).await.map_err(bus_err)
    }

    async fn daemon_reload(&self) -> Result<(), SystemdError> {
        self.manager.reload().await.map_err(bus_err)
    }

    async fn subscribe_events(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<SystemdEvent>, SystemdError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut unit_new = self.manager.receive_unit_new().await.map_err(bus_err)?;
        let unit_new_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(signal) = unit_new.next().await {
                let Ok(args) = signal.args() else { continue };
                let _ = unit_new_tx.send(SystemdEvent::UnitNew {
                    name: args.id.clone(),
                    path: args.unit.to_string(),
                });
            }
        });

        let mut unit_removed = self.manager.receive_unit_removed().await.map_err(bus_err)?;
        let unit_removed_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(signal) = unit_removed.next().await {
                let Ok(args) = signal.args() else { continue };
                let _ = unit_removed_tx.send(SystemdEvent::UnitRemoved {
                    name: args.id.clone(),
                    path: args.unit.to_string(),
                });
            }
        });

        let mut job_removed = self.manager.receive_job_removed().await.map_err(bus_err)?;
        let job_removed_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(signal) = job_removed.next().await {
                let Ok(args) = signal.args() else { continue };
                let _ = job_removed_tx.send(SystemdEvent::JobRemoved {
                    path: args.job.to_string(),
                    result: args.result.clone(),
                });
            }
        });

        spawn_properties_stream(&self.conn, "/org/freedesktop/systemd1/unit", tx.clone())
            .await?;
        spawn_properties_stream(&self.conn, "/org/freedesktop/systemd1/job", tx).await?;

        Ok(rx)
    }
}

/// Watch PropertiesChanged in a path namespace and translate into
/// agent events.
async fn spawn_properties_stream(
    conn: &zbus::Connection,
    namespace: &'static str,
    tx: mpsc::UnboundedSender<SystemdEvent>,
) -> Result<(), SystemdError> {
    let rule = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .sender("org.freedesktop.systemd1")
        .map_err(bus_err)?
        .interface("org.freedesktop.DBus.Properties")
        .map_err(bus_err)?
        .member("PropertiesChanged")
        .map_err(bus_err)?
        .path_namespace(namespace)
        .map_err(bus_err)?
        .build();
    let mut stream =
        MessageStream::for_match_rule(rule, conn, Some(64)).await.map_err(bus_err)?;

    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let Ok(msg) = msg else { continue };
            let Some(path) = msg.path().map(|p| p.to_string()) else { continue };
            let body: Result<(String, HashMap<String, OwnedValue>, Vec<String>), _> = msg.body();
            let Ok((interface, changed, _invalidated)) = body else {
                debug!("undecodable PropertiesChanged on {}", path);
                continue;
            };

            if namespace.ends_with("/job") {
                if let Some(state) = changed.get("State").and_then(|v| {
                    let value: &Value<'_> = v;
                    match value {
                        Value::Str(s) => s.as_str().parse().ok(),
                        _ => None,
                    }
                }) {
                    let _ = tx.send(SystemdEvent::JobStateChanged { path: path.clone(), state });
                }
                continue;
            }

            let Some(name) = unit_name_from_path(&path) else {
                warn!("properties change on unparseable unit path {}", path);
                continue;
            };
            if interface == "org.freedesktop.systemd1.Unit" {
                let active = changed
                    .get("ActiveState")
                    .and_then(|v| match &**v {
                        Value::Str(s) => Some(parse_active(s.as_str())),
                        _ => None,
                    });
                let sub = changed.get("SubState").and_then(|v| match &**v {
                    Value::Str(s) => Some(s.as_str().to_string()),
                    _ => None,
                });
                if let (Some(active), Some(sub)) = (active, sub) {
                    let _ = tx.send(SystemdEvent::UnitStateChanged {
                        name: name.clone(),
                        path: path.clone(),
                        active,
                        sub,
                    });
                }
            }
            let _ = tx.send(SystemdEvent::UnitPropertiesChanged {
                name,
                interface,
                props: owned_props_to_wire(changed),
            });
        }
    });
    Ok(())
}
