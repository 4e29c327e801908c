//! Daemon logic between `myhome-api` and the user-facing surfaces (CLI,
//! HTTP proxy).
//!
//! - **[`Daemon`]**: Facade that opens the [`Registry`], starts the MQTT
//!   producers, the [`Updater`](updater::Updater), the message cache and the
//!   RPC server under one cancellation tree.
//!
//! - **[`Registry`]**: In-memory index over the SQLite [`Store`], keyed by
//!   id, MAC, host and name. All device writes go through
//!   [`Registry::modify`], which serializes per id.
//!
//! - **[`Broker`]**: Immutable verb table shared by the in-process, MQTT
//!   (`myhome/rpc`) and HTTP (`POST /rpc`) surfaces. [`RpcClient`] is the
//!   MQTT caller used by the CLI.
//!
//! - **[`ShellyProxy`]**: Per-device RPC over HTTP and MQTT with channel
//!   fallback, behind the [`DeviceRpc`] seam that setup and script
//!   versioning are written against.
//!
//! - **Domain model** ([`model`]): `Device`, BTHome frames, groups, rooms
//!   and temperature schedules.

pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod model;
pub mod mqtt_cache;
pub mod occupancy;
pub mod recorder;
pub mod router;
pub mod rpc;
pub mod script;
pub mod setup;
pub mod shelly;
pub mod store;
pub mod updater;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DaemonConfig, SetupTimings, Toggle};
pub use daemon::{DAEMON_CLIENT_ID, Daemon, Services};
pub use error::{CoreError, ErrorKind};
pub use events::{DeviceUpdate, UpdateSender};
pub use mqtt_cache::{CacheStats, MessageCache};
pub use rpc::{Broker, Empty, MethodInfo, RpcClient};
pub use shelly::{Channel, DeviceRpc, ShellyProxy};
pub use store::{Registry, RegistryEvent, Store};

pub use model::{
    BluEvent, BluInfo, ComfortRange, Device, DeviceKind, Group, KindSchedule, MacAddress, Room,
    TemperatureConfig, WeekdayDefault,
};
