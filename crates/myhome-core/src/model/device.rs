// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::Ipv4Addr;
use strum::{Display, EnumString};

use super::ids::MacAddress;

pub const SHELLY: &str = "Shelly";

/// Device family. Decides which transport and lifecycle applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum DeviceKind {
    /// HTTP callbacks and `shellies/...` sensor topics.
    Gen1,
    /// Gen2+ JSON-RPC over HTTP and MQTT.
    Gen2,
    /// Bluetooth sensors relayed by a gateway.
    Blu,
    Tapo,
}

impl DeviceKind {
    /// Only Gen2+ devices are refreshed and set up.
    pub fn is_rpc_capable(self) -> bool {
        matches!(self, Self::Gen2)
    }
}

/// Lookup surface shared by devices and anything that stands in for one.
pub trait Addressable {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn host(&self) -> &str;
    fn mac(&self) -> Option<&MacAddress>;

    /// The host, when it is a literal IPv4 address.
    fn ip(&self) -> Option<Ipv4Addr> {
        self.host().parse().ok()
    }
}

/// The canonical device record.
///
/// `info`, `config` and `status` are kept exactly as the device sent them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub manufacturer: String,
    pub id: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub mac: Option<MacAddress>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub config_revision: u32,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub info: Value,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    /// A skeleton record: identity only, empty blobs.
    pub fn new(manufacturer: impl Into<String>, id: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            id: id.into(),
            kind,
            mac: None,
            name: String::new(),
            host: String::new(),
            config_revision: 0,
            room_id: None,
            info: Value::Null,
            config: Value::Null,
            status: Value::Null,
            last_seen: None,
        }
    }

    pub fn shelly(id: impl Into<String>, kind: DeviceKind) -> Self {
        Self::new(SHELLY, id, kind)
    }

    pub fn primary_key(&self) -> (&str, &str) {
        (&self.manufacturer, &self.id)
    }

    pub fn has_info(&self) -> bool {
        match &self.info {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }

    /// Record a reported configuration revision. Returns `true` when it is
    /// strictly newer, meaning the cached config is stale.
    pub fn advance_revision(&mut self, revision: u32) -> bool {
        if revision > self.config_revision {
            self.config_revision = revision;
            true
        } else {
            false
        }
    }

    /// Replace the whole status blob.
    pub fn replace_status(&mut self, status: Value) {
        self.status = status;
    }

    /// Overwrite the components present in `partial`, keeping the rest.
    pub fn merge_status(&mut self, partial: &Value) {
        let Value::Object(update) = partial else {
            return;
        };
        let status = object_mut(&mut self.status);
        for (component, value) in update {
            status.insert(component.clone(), value.clone());
        }
    }

    /// Store a Gen1 sensor reading under `status.sensor.<name>`.
    pub fn set_sensor(&mut self, name: &str, value: f32) {
        let status = object_mut(&mut self.status);
        let sensor = status
            .entry("sensor")
            .or_insert_with(|| Value::Object(Map::new()));
        object_mut(sensor).insert(name.to_owned(), Value::from(f64::from(value)));
    }

    /// Name used in URLs and listings: host, then name, then id.
    pub fn token(&self) -> &str {
        [&self.host, &self.name]
            .into_iter()
            .find(|s| !s.is_empty())
            .map_or(self.id.as_str(), String::as_str)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Some(Utc::now());
    }
}

impl Addressable for Device {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn mac(&self) -> Option<&MacAddress> {
        self.mac.as_ref()
    }
}

/// Coerce a value into an object in place and borrow its map.
fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("coerced to an object above"),
    }
}
