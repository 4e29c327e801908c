// In-memory Gen2 device for unit tests of refresh, setup and script
// versioning. Implements just enough of the RPC surface to be stateful.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::CoreError;
use crate::shelly::{Channel, DeviceRpc};

const READS: [&str; 10] = [
    "Shelly.GetDeviceInfo",
    "Shelly.GetConfig",
    "Shelly.GetStatus",
    "Shelly.ListMethods",
    "Shelly.CheckForUpdate",
    "Sys.GetConfig",
    "Script.List",
    "Script.GetCode",
    "KVS.Get",
    "Schedule.List",
];

#[derive(Debug, Clone)]
pub(crate) struct FakeScript {
    pub id: u32,
    pub name: String,
    pub enable: bool,
    pub running: bool,
    pub code: String,
}

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub calls: Vec<(String, Value)>,
    pub scripts: Vec<FakeScript>,
    pub kvs: HashMap<String, Value>,
    pub jobs: Vec<Value>,
    pub sys_name: Option<String>,
    pub sntp: Option<String>,
    pub pending_updates: u32,
    pub mqtt_restart_required: bool,
    pub mqtt_server: Option<String>,
    pub matter_supported: bool,
    pub reboots: u32,
}

pub(crate) struct FakeDevice {
    id: String,
    pub state: Mutex<FakeState>,
}

impl FakeDevice {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            state: Mutex::new(FakeState {
                matter_supported: true,
                ..FakeState::default()
            }),
        })
    }

    pub fn methods(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|(m, _)| m.clone()).collect()
    }

    /// Calls that change device state.
    pub fn writes(&self) -> Vec<String> {
        self.methods()
            .into_iter()
            .filter(|m| !READS.contains(&m.as_str()))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn handle(&self, method: &str, p: &Value) -> Result<Value, CoreError> {
        let mut s = self.state.lock();
        let id_param = || {
            p["id"]
                .as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .unwrap_or_default()
        };
        let not_found = || CoreError::Device {
            code: -105,
            message: "not found".into(),
        };
        match method {
            "Shelly.GetDeviceInfo" => Ok(json!({
                "id": self.id, "mac": "AABBCCDDEEFF", "gen": 2, "ver": "1.4.4", "app": "Plus1"
            })),
            "Shelly.GetConfig" => Ok(json!({"sys": {"cfg_rev": 7}})),
            "Shelly.GetStatus" => Ok(json!({"sys": {"cfg_rev": 7, "uptime": 42}})),
            "Shelly.CheckForUpdate" => Ok(if s.pending_updates > 0 {
                json!({"stable": {"version": "1.5.0"}})
            } else {
                json!({})
            }),
            "Shelly.Update" => {
                s.pending_updates = s.pending_updates.saturating_sub(1);
                Ok(Value::Null)
            }
            "Shelly.Reboot" => {
                s.reboots += 1;
                Ok(Value::Null)
            }
            "Sys.GetConfig" => Ok(json!({
                "device": {"name": s.sys_name},
                "sntp": {"server": s.sntp},
            })),
            "Sys.SetConfig" => {
                if let Some(name) = p["config"]["device"]["name"].as_str() {
                    s.sys_name = Some(name.to_owned());
                }
                if let Some(server) = p["config"]["sntp"]["server"].as_str() {
                    s.sntp = Some(server.to_owned());
                }
                Ok(json!({"restart_required": false}))
            }
            "Matter.SetConfig" if s.matter_supported => Ok(json!({"restart_required": false})),
            "Mqtt.SetConfig" => {
                s.mqtt_server = p["config"]["server"].as_str().map(str::to_owned);
                Ok(json!({"restart_required": s.mqtt_restart_required}))
            }
            "Script.List" => Ok(json!({
                "scripts": s.scripts.iter().map(|sc| json!({
                    "id": sc.id, "name": sc.name, "enable": sc.enable, "running": sc.running
                })).collect::<Vec<_>>()
            })),
            "Script.Create" => {
                let id = (1..)
                    .find(|id| s.scripts.iter().all(|sc| sc.id != *id))
                    .unwrap_or_default();
                s.scripts.push(FakeScript {
                    id,
                    name: p["name"].as_str().unwrap_or_default().to_owned(),
                    enable: false,
                    running: false,
                    code: String::new(),
                });
                Ok(json!({"id": id}))
            }
            "Script.PutCode" => {
                let id = id_param();
                let code = p["code"].as_str().unwrap_or_default().to_owned();
                let append = p["append"].as_bool().unwrap_or(false);
                let script = s.scripts.iter_mut().find(|sc| sc.id == id).ok_or_else(not_found)?;
                if append {
                    script.code.push_str(&code);
                } else {
                    script.code = code;
                }
                Ok(json!({"len": script.code.len()}))
            }
            "Script.GetCode" => {
                let id = id_param();
                let offset = usize::try_from(p["offset"].as_u64().unwrap_or(0)).unwrap_or(0);
                let script = s.scripts.iter().find(|sc| sc.id == id).ok_or_else(not_found)?;
                let start = offset.min(script.code.len());
                let end = script.code.len().min(start + 256);
                let data = script.code.get(start..end).unwrap_or_default();
                Ok(json!({"data": data, "left": script.code.len() - end}))
            }
            "Script.Start" | "Script.Stop" => {
                let id = id_param();
                let script = s.scripts.iter_mut().find(|sc| sc.id == id).ok_or_else(not_found)?;
                let was_running = script.running;
                script.running = method == "Script.Start";
                Ok(json!({"was_running": was_running}))
            }
            "Script.SetConfig" => {
                let id = id_param();
                let script = s.scripts.iter_mut().find(|sc| sc.id == id).ok_or_else(not_found)?;
                if let Some(enable) = p["config"]["enable"].as_bool() {
                    script.enable = enable;
                }
                Ok(json!({"restart_required": false}))
            }
            "Script.Delete" => {
                let id = id_param();
                let before = s.scripts.len();
                s.scripts.retain(|sc| sc.id != id);
                if s.scripts.len() == before {
                    return Err(not_found());
                }
                Ok(Value::Null)
            }
            "KVS.Get" => {
                let key = p["key"].as_str().unwrap_or_default();
                let value = s.kvs.get(key).cloned().ok_or_else(not_found)?;
                Ok(json!({"etag": "e", "value": value}))
            }
            "KVS.Set" => {
                let key = p["key"].as_str().unwrap_or_default().to_owned();
                s.kvs.insert(key, p["value"].clone());
                Ok(json!({"etag": "e"}))
            }
            "KVS.Delete" => {
                let key = p["key"].as_str().unwrap_or_default();
                s.kvs.remove(key).map(|_| Value::Null).ok_or_else(not_found)
            }
            "Schedule.List" => Ok(json!({"jobs": s.jobs})),
            "Schedule.Create" => {
                let id = u32::try_from(s.jobs.len() + 1).unwrap_or(u32::MAX);
                let mut job = p.clone();
                job["id"] = json!(id);
                s.jobs.push(job);
                Ok(json!({"id": id}))
            }
            "Schedule.Update" => {
                let id = p["id"].clone();
                let job = s.jobs.iter_mut().find(|j| j["id"] == id).ok_or_else(not_found)?;
                *job = p.clone();
                Ok(Value::Null)
            }
            _ => Err(CoreError::Device {
                code: 404,
                message: format!("No handler for {method}"),
            }),
        }
    }
}

#[async_trait]
impl DeviceRpc for FakeDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    async fn call_raw(
        &self,
        _channel: Channel,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CoreError> {
        let params = params.unwrap_or_else(|| json!({}));
        self.state
            .lock()
            .calls
            .push((method.to_owned(), params.clone()));
        self.handle(method, &params)
    }
}
