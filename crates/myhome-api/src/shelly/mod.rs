// Shelly Gen2+ JSON-RPC: wire frames, the typed method catalog, and
// the HTTP channel. The MQTT channel lives with the per-device proxy in
// myhome-core because it needs the device's inbox.

pub mod http;
pub mod methods;
pub mod wire;
