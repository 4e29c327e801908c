// ── Typed Shelly Gen2+ method catalog ──
//
// Only the verbs the daemon itself drives are typed here. Everything
// else goes through the untyped `call_raw` paths with JSON values.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A device RPC verb with its parameter and result shapes.
///
/// Type identity of the call travels with `NAME`; both the HTTP and the
/// MQTT channel serialize `Params` and decode `Result` the same way.
pub trait Method {
    const NAME: &'static str;
    type Params: Serialize + Send + Sync;
    type Result: DeserializeOwned + Send;
}

macro_rules! method {
    ($(#[$meta:meta])* $ty:ident, $name:literal, $params:ty => $result:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $ty;

        impl Method for $ty {
            const NAME: &'static str = $name;
            type Params = $params;
            type Result = $result;
        }
    };
}

/// Serializes to `{}` for verbs that take no arguments.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NoParams {}

// ── Shelly.* ────────────────────────────────────────────────────────

method!(GetDeviceInfo, "Shelly.GetDeviceInfo", NoParams => Value);
method!(GetConfig, "Shelly.GetConfig", NoParams => Value);
method!(GetStatus, "Shelly.GetStatus", NoParams => Value);
method!(ListMethods, "Shelly.ListMethods", NoParams => MethodList);
method!(CheckForUpdate, "Shelly.CheckForUpdate", NoParams => UpdateInfo);
method!(Update, "Shelly.Update", UpdateParams => Value);
method!(Reboot, "Shelly.Reboot", RebootParams => Value);

/// The typed view of `Shelly.GetDeviceInfo` the daemon relies on.
/// The full blob is kept verbatim on the device record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, rename = "gen")]
    pub generation: Option<u32>,
    #[serde(default)]
    pub ver: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MethodList {
    #[serde(default)]
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareRelease {
    pub version: String,
    #[serde(default)]
    pub build_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    #[serde(default)]
    pub stable: Option<FirmwareRelease>,
    #[serde(default)]
    pub beta: Option<FirmwareRelease>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl UpdateParams {
    pub fn stable() -> Self {
        Self {
            stage: Some("stable".into()),
            url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RebootParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u32>,
}

/// Result shared by every `*.SetConfig` verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct SetConfigResult {
    #[serde(default)]
    pub restart_required: bool,
}

// ── Sys.* ───────────────────────────────────────────────────────────

method!(SysGetConfig, "Sys.GetConfig", NoParams => SysConfig);
method!(SysSetConfig, "Sys.SetConfig", SysSetConfigParams => SetConfigResult);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysDevice {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysSntp {
    #[serde(default)]
    pub server: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysConfig {
    #[serde(default)]
    pub device: SysDevice,
    #[serde(default)]
    pub sntp: SysSntp,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SysSetConfigParams {
    pub config: SysConfigPatch,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SysConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<SysDevice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sntp: Option<SysSntp>,
}

// ── Mqtt.* / Matter.* ───────────────────────────────────────────────

method!(MqttSetConfig, "Mqtt.SetConfig", MqttSetConfigParams => SetConfigResult);
method!(MatterSetConfig, "Matter.SetConfig", MatterSetConfigParams => SetConfigResult);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MqttSetConfigParams {
    pub config: MqttDeviceConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MqttDeviceConfig {
    pub enable: bool,
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    pub rpc_ntf: bool,
    pub status_ntf: bool,
    pub enable_control: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MatterSetConfigParams {
    pub config: MatterConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MatterConfig {
    pub enable: bool,
}

// ── Script.* ────────────────────────────────────────────────────────

method!(ScriptList, "Script.List", NoParams => ScriptListResult);
method!(ScriptCreate, "Script.Create", ScriptCreateParams => ScriptId);
method!(ScriptPutCode, "Script.PutCode", ScriptPutCodeParams => ScriptPutCodeResult);
method!(ScriptStart, "Script.Start", ScriptId => ScriptRunResult);
method!(ScriptStop, "Script.Stop", ScriptId => ScriptRunResult);
method!(ScriptDelete, "Script.Delete", ScriptId => Value);
method!(ScriptSetConfig, "Script.SetConfig", ScriptSetConfigParams => SetConfigResult);
method!(ScriptGetCode, "Script.GetCode", ScriptGetCodeParams => ScriptCode);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptListResult {
    #[serde(default)]
    pub scripts: Vec<ScriptEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptCreateParams {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptId {
    pub id: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptPutCodeParams {
    pub id: u32,
    pub code: String,
    pub append: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ScriptPutCodeResult {
    #[serde(default)]
    pub len: usize,
}

/// Reads continue from `offset` bytes into the stored code.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScriptGetCodeParams {
    pub id: u32,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptCode {
    #[serde(default)]
    pub data: String,
    /// Bytes still unread after this piece.
    #[serde(default)]
    pub left: usize,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ScriptRunResult {
    #[serde(default)]
    pub was_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptSetConfigParams {
    pub id: u32,
    pub config: ScriptConfigPatch,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
}

// ── KVS.* ───────────────────────────────────────────────────────────

method!(KvsGet, "KVS.Get", KvsKey => KvsValue);
method!(KvsSet, "KVS.Set", KvsSetParams => Value);
method!(KvsDelete, "KVS.Delete", KvsKey => Value);

#[derive(Debug, Clone, Serialize)]
pub struct KvsKey {
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KvsValue {
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct KvsSetParams {
    pub key: String,
    pub value: Value,
}

// ── Schedule.* ──────────────────────────────────────────────────────

method!(ScheduleList, "Schedule.List", NoParams => ScheduleListResult);
method!(ScheduleCreate, "Schedule.Create", JobSpec => JobCreated);
method!(ScheduleUpdate, "Schedule.Update", JobUpdate => Value);

/// One RPC call inside a scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCall {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u32,
    #[serde(default)]
    pub enable: bool,
    pub timespec: String,
    #[serde(default)]
    pub calls: Vec<JobCall>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleListResult {
    #[serde(default)]
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    pub enable: bool,
    pub timespec: String,
    pub calls: Vec<JobCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdate {
    pub id: u32,
    pub enable: bool,
    pub timespec: String,
    pub calls: Vec<JobCall>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct JobCreated {
    pub id: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_params_serializes_to_empty_object() {
        assert_eq!(serde_json::to_value(NoParams {}).unwrap(), json!({}));
    }

    #[test]
    fn device_info_reads_gen_field() {
        let info: DeviceInfo = serde_json::from_value(json!({
            "id": "shellyplus1-a8032ab12345",
            "mac": "A8032AB12345",
            "gen": 2,
            "ver": "1.4.4",
            "app": "Plus1"
        }))
        .unwrap();
        assert_eq!(info.generation, Some(2));
        assert_eq!(info.name, None);
    }

    #[test]
    fn sys_patch_skips_unchanged_sections() {
        let params = SysSetConfigParams {
            config: SysConfigPatch {
                device: Some(SysDevice {
                    name: Some("kitchen".into()),
                }),
                sntp: None,
            },
        };
        assert_eq!(
            serde_json::to_value(params).unwrap(),
            json!({"config": {"device": {"name": "kitchen"}}})
        );
    }

    #[test]
    fn update_info_without_stable() {
        let info: UpdateInfo = serde_json::from_value(json!({})).unwrap();
        assert!(info.stable.is_none());
        assert_eq!(CheckForUpdate::NAME, "Shelly.CheckForUpdate");
    }
}
