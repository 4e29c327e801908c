//! Async transports for talking to Shelly devices.
//!
//! - **[`ShellyHttpClient`]**: JSON-RPC over `POST http://<host>/rpc/<method>`.
//! - **[`MqttLink`]**: publish/subscribe seam, implemented by the
//!   broker-backed [`MqttClient`] and the in-process [`LoopbackLink`].
//! - **[`mdns`]**: `_shelly._tcp.local.` browsing and name resolution.
//! - **[`shelly`]**: wire frames and the typed [`Method`] catalog shared by
//!   both RPC channels.

pub mod error;
pub mod mdns;
pub mod mqtt;
pub mod shelly;
pub mod transport;

pub use error::Error;
pub use mqtt::{LoopbackLink, Message, MqttClient, MqttLink, MqttOptions, topic_matches};
pub use shelly::http::ShellyHttpClient;
pub use shelly::methods::Method;
pub use shelly::wire::{Notification, Request, Response, RpcErrorBody};
pub use transport::TransportConfig;
