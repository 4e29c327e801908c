//! Configuration for the myhome daemon and CLI.
//!
//! A flat TOML file with the daemon's kebab-case option names, layered
//! with `MYHOME_*` environment variables, and translation to
//! `myhome_core::DaemonConfig`. The CLI applies its flags on top of the
//! resolved [`Config`] before translating.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytesize::ByteSize;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use myhome_core::{DaemonConfig, SetupTimings, Toggle};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config ─────────────────────────────────────────────────────

/// Everything that can be set in `config.toml` or `MYHOME_*`.
///
/// Durations use humantime syntax (`14s`, `1m`, `2h 30m`); sizes accept
/// `10MiB`-style suffixes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// `host[:port]`; empty means `localhost:1883`.
    pub mqtt_broker: String,
    pub mqtt_username: Option<String>,
    /// Plaintext; prefer `MYHOME_MQTT_PASSWORD`.
    pub mqtt_password: Option<String>,
    /// Broker address pushed to devices during setup.
    pub device_broker: Option<String>,
    pub sntp_server: Option<String>,
    pub mqtt_timeout: String,
    pub mqtt_grace: String,
    pub mdns_timeout: String,
    pub refresh_interval: String,
    pub mqtt_watchdog_interval: String,
    pub mqtt_watchdog_max_failures: u32,
    pub proxy_port: u16,
    pub enable_gen1_proxy: Toggle,
    pub enable_occupancy_service: Toggle,
    pub enable_mdns: bool,
    /// Empty disables the event recorder.
    pub events_dir: String,
    pub auto_setup: bool,
    /// Defaults to `myhome.db` in the platform data directory.
    pub database: Option<PathBuf>,
    pub cache_topic: String,
    pub cache_budget: String,

    // CLI-only settings
    /// How long the CLI waits for the daemon to answer.
    pub rpc_timeout: String,
    /// Default output format for CLI listings.
    pub output: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_broker: String::new(),
            mqtt_username: None,
            mqtt_password: None,
            device_broker: None,
            sntp_server: None,
            mqtt_timeout: "14s".into(),
            mqtt_grace: "2s".into(),
            mdns_timeout: "7s".into(),
            refresh_interval: "1m".into(),
            mqtt_watchdog_interval: "30s".into(),
            mqtt_watchdog_max_failures: 3,
            proxy_port: 6080,
            enable_gen1_proxy: Toggle::Auto,
            enable_occupancy_service: Toggle::Auto,
            enable_mdns: true,
            events_dir: String::new(),
            auto_setup: false,
            database: None,
            cache_topic: "shelly-blu/#".into(),
            cache_budget: "10MiB".into(),
            rpc_timeout: "20s".into(),
            output: "table".into(),
        }
    }
}

impl Config {
    /// Translate into the daemon's runtime settings.
    pub fn to_daemon_config(&self) -> Result<DaemonConfig, ConfigError> {
        if self.mqtt_watchdog_max_failures == 0 {
            return Err(ConfigError::Validation {
                field: "mqtt-watchdog-max-failures".into(),
                reason: "must be at least 1".into(),
            });
        }
        let events_dir = Some(self.events_dir.trim())
            .filter(|d| !d.is_empty())
            .map(PathBuf::from);

        Ok(DaemonConfig {
            mqtt_broker: self.mqtt_broker.trim().to_owned(),
            mqtt_username: self.mqtt_username.clone().filter(|u| !u.is_empty()),
            mqtt_password: self.mqtt_password.clone().map(SecretString::from),
            device_broker: self.device_broker.clone().filter(|b| !b.is_empty()),
            sntp_server: self.sntp_server.clone().filter(|s| !s.is_empty()),
            mqtt_timeout: parse_duration("mqtt-timeout", &self.mqtt_timeout)?,
            mqtt_grace: parse_duration("mqtt-grace", &self.mqtt_grace)?,
            mdns_timeout: parse_duration("mdns-timeout", &self.mdns_timeout)?,
            refresh_interval: parse_duration("refresh-interval", &self.refresh_interval)?,
            mqtt_watchdog_interval: parse_duration(
                "mqtt-watchdog-interval",
                &self.mqtt_watchdog_interval,
            )?,
            mqtt_watchdog_max_failures: self.mqtt_watchdog_max_failures,
            proxy_port: self.proxy_port,
            enable_gen1_proxy: self.enable_gen1_proxy,
            enable_occupancy_service: self.enable_occupancy_service,
            enable_mdns: self.enable_mdns,
            events_dir,
            auto_setup: self.auto_setup,
            database: self.database.clone().unwrap_or_else(default_database),
            cache_topic: self.cache_topic.clone(),
            cache_budget_bytes: parse_size("cache-budget", &self.cache_budget)?,
            setup: SetupTimings::default(),
        })
    }

    pub fn rpc_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("rpc-timeout", &self.rpc_timeout)
    }

    /// TOML text with the password masked, for display.
    pub fn to_masked_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.mqtt_password.is_some() {
            shown.mqtt_password = Some("********".into());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{raw}': {e}"),
    })
}

fn parse_size(field: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| ConfigError::Validation {
            field: field.into(),
            reason: format!("'{raw}': {e}"),
        })
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "myhome", "myhome")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// `myhome.db` in the platform data directory.
pub fn default_database() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback().join("myhome.db"),
        |dirs| dirs.data_dir().join("myhome.db"),
    )
}

fn home_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("myhome");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Defaults, then the TOML file (if present), then `MYHOME_*`.
///
/// `MYHOME_MQTT_BROKER` maps to `mqtt-broker`.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MYHOME_").map(|key| key.as_str().replace('_', "-").into()))
}

/// Load from `path`, or the platform config path when `None`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    Ok(figment(&path).extract()?)
}

// ── Saving ──────────────────────────────────────────────────────────

pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

/// Write a default config file. Refuses to overwrite unless `force`.
pub fn init_config(path: &Path, force: bool) -> Result<Config, ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    let cfg = Config::default();
    save_config(&cfg, path)?;
    Ok(cfg)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn load_file(text: &str) -> Result<Config, ConfigError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();
        Ok(Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&path))
            .extract()?)
    }

    #[test]
    fn defaults_resolve_to_daemon_defaults() {
        let daemon = Config::default().to_daemon_config().unwrap();
        let expected = DaemonConfig::default();
        assert_eq!(daemon.mqtt_timeout, expected.mqtt_timeout);
        assert_eq!(daemon.mqtt_grace, expected.mqtt_grace);
        assert_eq!(daemon.mdns_timeout, expected.mdns_timeout);
        assert_eq!(daemon.refresh_interval, expected.refresh_interval);
        assert_eq!(daemon.mqtt_watchdog_interval, expected.mqtt_watchdog_interval);
        assert_eq!(daemon.cache_budget_bytes, 10 * 1024 * 1024);
        assert_eq!(daemon.proxy_port, 6080);
        assert!(daemon.events_dir.is_none());
        assert!(daemon.database.ends_with("myhome.db"));
    }

    #[test]
    fn file_values_override_defaults() {
        let cfg = load_file(
            r#"
mqtt-broker = "10.0.0.2:1884"
mqtt-username = "hub"
mqtt-password = "s3cret"
refresh-interval = "5m"
enable-occupancy-service = "off"
events-dir = "/var/log/myhome"
"#,
        )
        .unwrap();
        let daemon = cfg.to_daemon_config().unwrap();
        assert_eq!(daemon.mqtt_broker, "10.0.0.2:1884");
        assert_eq!(daemon.mqtt_username.as_deref(), Some("hub"));
        assert!(daemon.mqtt_password.is_some());
        assert_eq!(daemon.refresh_interval, Duration::from_secs(300));
        assert_eq!(daemon.enable_occupancy_service, Toggle::Off);
        assert_eq!(daemon.events_dir, Some(PathBuf::from("/var/log/myhome")));
        assert_eq!(daemon.mqtt_timeout, Duration::from_secs(14));
    }

    #[test]
    fn bad_duration_names_the_field() {
        let cfg = Config {
            mqtt_timeout: "soon".into(),
            ..Config::default()
        };
        let err = cfg.to_daemon_config().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "mqtt-timeout"));
    }

    #[test]
    fn unknown_toggle_is_rejected() {
        assert!(load_file(r#"enable-gen1-proxy = "maybe""#).is_err());
    }

    #[test]
    fn masked_toml_hides_password() {
        let cfg = Config {
            mqtt_password: Some("s3cret".into()),
            ..Config::default()
        };
        let text = cfg.to_masked_toml().unwrap();
        assert!(!text.contains("s3cret"));
        assert!(text.contains("mqtt-password = \"********\""));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        init_config(&path, false).unwrap();
        assert!(matches!(
            init_config(&path, false),
            Err(ConfigError::AlreadyExists { .. })
        ));
        init_config(&path, true).unwrap();

        let loaded = load_file(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.proxy_port, 6080);
        assert_eq!(loaded.refresh_interval, "1m");
    }
}
