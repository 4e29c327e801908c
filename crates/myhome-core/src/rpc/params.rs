// Request and reply shapes of the daemon's verbs. The CLI builds the
// same structs, so both ends agree on field names.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Device, DeviceKind, MacAddress};
use crate::shelly::Channel;

/// Any device token: id, MAC, host or name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceToken {
    pub device: String,
}

/// Identity of a device, as returned by `device.lookup` and `device.forget`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub id: String,
    pub kind: DeviceKind,
    pub name: String,
    pub host: String,
    pub mac: Option<MacAddress>,
    /// Best known IPv4: the host itself, or an mDNS answer.
    pub ip: Option<Ipv4Addr>,
}

impl DeviceRef {
    pub fn of(device: &Device, ip: Option<Ipv4Addr>) -> Self {
        Self {
            id: device.id.clone(),
            kind: device.kind,
            name: device.name.clone(),
            host: device.host.clone(),
            mac: device.mac.clone(),
            ip,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCall {
    pub device: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub channel: Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRoom {
    pub device: String,
    /// `None` clears the room.
    #[serde(default)]
    pub room: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptUpload {
    pub device: String,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRef {
    pub device: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDeleted {
    pub id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupId {
    pub group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub group: String,
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomId {
    pub room: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn optional_fields_default() {
        let call: DeviceCall =
            serde_json::from_value(json!({"device": "hall", "method": "Switch.Toggle"})).unwrap();
        assert_eq!(call.channel, Channel::Default);
        assert!(call.params.is_none());

        let upload: ScriptUpload =
            serde_json::from_value(json!({"device": "hall", "name": "a.js", "code": "x"})).unwrap();
        assert!(!upload.force);
    }
}
