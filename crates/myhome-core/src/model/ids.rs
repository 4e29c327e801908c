// ── Identity helpers ──
//
// Shelly ids are lowercase `<model>-<hexserial>`; MACs show up in at
// least three spellings (colon, dash, bare hex, either case). Both are
// normalized here so index lookups never miss on formatting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// MAC address, normalized to lowercase colon-separated form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse any common spelling: `AA:BB:..`, `aa-bb-..`, `aabbcc..`.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let hex: String = raw
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::Protocol {
                message: format!("not a MAC address: {raw}"),
            });
        }
        let pairs: Vec<&str> = (0..6).filter_map(|i| hex.get(i * 2..i * 2 + 2)).collect();
        Ok(Self(pairs.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bare lowercase hex, as used in Shelly ids.
    pub fn compact(&self) -> String {
        self.0.replace(':', "")
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

/// Canonical device id: trimmed and lowercased.
pub fn normalize_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Whether `id` looks like a Shelly device (`shelly*`).
pub fn is_shelly_id(id: &str) -> bool {
    id.starts_with("shelly")
}

/// Id of the BLU device with this MAC: `shellyblu-<hex>`.
pub fn blu_id(mac: &MacAddress) -> String {
    format!("shellyblu-{}", mac.compact())
}
