// ── Runtime daemon configuration ──
//
// Resolved settings handed to `Daemon::start`. The config crate and the
// CLI build this from files, environment and flags; core never reads
// config files itself.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Tri-state switch for optional services.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Toggle {
    On,
    Off,
    #[default]
    Auto,
}

impl Toggle {
    /// `auto` currently resolves to enabled.
    pub fn enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Waits used by the auto-setup state machine.
///
/// Tests zero these out; production uses [`SetupTimings::default`].
#[derive(Debug, Clone)]
pub struct SetupTimings {
    /// Pause after `Shelly.Update` before the device goes offline.
    pub update_settle: Duration,
    /// Time the device is expected to stay offline while flashing.
    pub update_offline: Duration,
    pub recontact_interval: Duration,
    pub recontact_attempts: u32,
    pub reboot_interval: Duration,
    pub reboot_attempts: u32,
    pub max_firmware_rounds: u32,
    /// Budget for the whole firmware phase.
    pub firmware_budget: Duration,
    /// Budget for uploading the watchdog script.
    pub script_budget: Duration,
}

impl Default for SetupTimings {
    fn default() -> Self {
        Self {
            update_settle: Duration::from_secs(5),
            update_offline: Duration::from_secs(30),
            recontact_interval: Duration::from_secs(5),
            recontact_attempts: 40,
            reboot_interval: Duration::from_secs(3),
            reboot_attempts: 20,
            max_firmware_rounds: 5,
            firmware_budget: Duration::from_secs(600),
            script_budget: Duration::from_secs(120),
        }
    }
}

impl SetupTimings {
    /// No waiting at all, for tests against fake devices.
    pub fn immediate() -> Self {
        Self {
            update_settle: Duration::ZERO,
            update_offline: Duration::ZERO,
            recontact_interval: Duration::ZERO,
            reboot_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Everything the daemon needs to run.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// `host[:port]`; empty means `localhost:1883`.
    pub mqtt_broker: String,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<SecretString>,
    /// Broker address pushed to devices during setup. `None` derives it
    /// from `mqtt_broker`, substituting this host's LAN address for
    /// loopback names.
    pub device_broker: Option<String>,
    /// SNTP server pushed to devices during setup.
    pub sntp_server: Option<String>,
    pub mqtt_timeout: Duration,
    pub mqtt_grace: Duration,
    pub mdns_timeout: Duration,
    pub refresh_interval: Duration,
    pub mqtt_watchdog_interval: Duration,
    pub mqtt_watchdog_max_failures: u32,
    pub proxy_port: u16,
    pub enable_gen1_proxy: Toggle,
    pub enable_occupancy_service: Toggle,
    pub enable_mdns: bool,
    /// Directory for per-device JSONL event logs; `None` disables it.
    pub events_dir: Option<PathBuf>,
    pub auto_setup: bool,
    pub database: PathBuf,
    pub cache_topic: String,
    pub cache_budget_bytes: u64,
    pub setup: SetupTimings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            mqtt_broker: String::new(),
            mqtt_username: None,
            mqtt_password: None,
            device_broker: None,
            sntp_server: None,
            mqtt_timeout: Duration::from_secs(14),
            mqtt_grace: Duration::from_secs(2),
            mdns_timeout: Duration::from_secs(7),
            refresh_interval: Duration::from_secs(60),
            mqtt_watchdog_interval: Duration::from_secs(30),
            mqtt_watchdog_max_failures: 3,
            proxy_port: 6080,
            enable_gen1_proxy: Toggle::Auto,
            enable_occupancy_service: Toggle::Auto,
            enable_mdns: true,
            events_dir: None,
            auto_setup: false,
            database: PathBuf::from("myhome.db"),
            cache_topic: "shelly-blu/#".into(),
            cache_budget_bytes: 10 * 1024 * 1024,
            setup: SetupTimings::default(),
        }
    }
}
