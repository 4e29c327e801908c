// ── BTHome v2 frames relayed by BLU gateways ──
//
// Gateways publish one JSON object per advertisement on
// `shelly-blu/events/<subtopic>`. Only the fields the daemon reads are
// typed; measurement fields stay as JSON so multi-channel sensors
// (arrays of buttons, several temperatures) decode too.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capability names in the order they are reported.
pub const CAPABILITY_ORDER: [&str; 8] = [
    "temperature",
    "humidity",
    "illuminance",
    "motion",
    "window",
    "button",
    "rotation",
    "battery",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BluEvent {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, rename = "BTHome_version")]
    pub bthome_version: Option<u8>,
    #[serde(default)]
    pub encryption: Option<bool>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub temperature: Option<Value>,
    #[serde(default)]
    pub humidity: Option<Value>,
    #[serde(default)]
    pub illuminance: Option<Value>,
    #[serde(default)]
    pub motion: Option<Value>,
    #[serde(default)]
    pub window: Option<Value>,
    #[serde(default)]
    pub button: Option<Value>,
    #[serde(default)]
    pub rotation: Option<Value>,
    #[serde(default)]
    pub battery: Option<Value>,
}

impl BluEvent {
    fn fields(&self) -> [(&'static str, Option<&Value>); 8] {
        [
            ("temperature", self.temperature.as_ref()),
            ("humidity", self.humidity.as_ref()),
            ("illuminance", self.illuminance.as_ref()),
            ("motion", self.motion.as_ref()),
            ("window", self.window.as_ref()),
            ("button", self.button.as_ref()),
            ("rotation", self.rotation.as_ref()),
            ("battery", self.battery.as_ref()),
        ]
    }

    /// Populated measurement fields, in [`CAPABILITY_ORDER`].
    pub fn capabilities(&self) -> Vec<&'static str> {
        self.fields()
            .into_iter()
            .filter_map(|(name, v)| v.filter(|v| !v.is_null()).map(|_| name))
            .collect()
    }

    /// The measurements as a status object.
    pub fn readings(&self) -> Map<String, Value> {
        self.fields()
            .into_iter()
            .filter_map(|(name, v)| v.map(|v| (name.to_owned(), v.clone())))
            .collect()
    }

    /// Whether this frame reports motion or a button press.
    pub fn is_activity(&self) -> bool {
        let truthy = |v: Option<&Value>| match v {
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n > 0.0),
            Some(Value::Bool(b)) => *b,
            Some(Value::Array(items)) => items.iter().any(|i| i.as_f64().is_some_and(|n| n > 0.0)),
            _ => false,
        };
        truthy(self.motion.as_ref()) || truthy(self.button.as_ref())
    }
}

/// What a BLU device's `info` blob records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluInfo {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub version: u8,
    #[serde(default)]
    pub encryption: bool,
}

impl BluInfo {
    pub fn from_value(info: &Value) -> Option<Self> {
        serde_json::from_value(info.clone()).ok()
    }

    /// Fold a frame in. New capabilities are appended in order of first
    /// observation; known ones keep their position. Header fields the
    /// frame leaves out keep their recorded values.
    pub fn merged_with(&self, event: &BluEvent) -> Self {
        let mut capabilities = self.capabilities.clone();
        for cap in event.capabilities() {
            if !capabilities.iter().any(|c| c == cap) {
                capabilities.push(cap.to_owned());
            }
        }
        Self {
            capabilities,
            version: event.bthome_version.unwrap_or(self.version),
            encryption: event.encryption.unwrap_or(self.encryption),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn capabilities_follow_populated_fields() {
        let ev: BluEvent = serde_json::from_value(json!({
            "address": "aa:bb:cc:dd:ee:ff",
            "BTHome_version": 2,
            "battery": 90,
            "humidity": null,
            "temperature": 21.0
        }))
        .unwrap();
        assert_eq!(ev.capabilities(), vec!["temperature", "battery"]);
    }

    #[test]
    fn merge_appends_in_first_seen_order() {
        let first: BluEvent = serde_json::from_value(json!({"temperature": 21.0})).unwrap();
        let second: BluEvent =
            serde_json::from_value(json!({"humidity": 42, "temperature": 21.5})).unwrap();

        let info = BluInfo::default().merged_with(&first);
        assert_eq!(info.capabilities, vec!["temperature"]);
        let info2 = info.merged_with(&second);
        assert_eq!(info2.capabilities, vec!["temperature", "humidity"]);
        assert_eq!(info2.merged_with(&first), info2);
    }

    #[test]
    fn frames_without_a_header_keep_the_recorded_one() {
        let full: BluEvent = serde_json::from_value(json!({
            "BTHome_version": 2, "encryption": true, "temperature": 21.0
        }))
        .unwrap();
        let bare: BluEvent = serde_json::from_value(json!({"temperature": 21.5})).unwrap();

        let info = BluInfo::default().merged_with(&full);
        assert_eq!(info.version, 2);
        assert!(info.encryption);
        assert_eq!(info.merged_with(&bare), info);
    }

    #[test]
    fn motion_and_button_are_activity() {
        let ev: BluEvent = serde_json::from_value(json!({"motion": 1})).unwrap();
        assert!(ev.is_activity());
        let ev: BluEvent = serde_json::from_value(json!({"button": [0, 1]})).unwrap();
        assert!(ev.is_activity());
        let ev: BluEvent = serde_json::from_value(json!({"motion": 0})).unwrap();
        assert!(!ev.is_activity());
    }
}
