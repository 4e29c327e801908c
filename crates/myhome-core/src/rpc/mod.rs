// ── RPC broker and its MQTT surface ──

pub mod broker;
pub mod client;
pub mod envelope;
pub mod params;
pub mod server;

pub use broker::{Broker, BrokerBuilder, Empty, MethodInfo};
pub use client::RpcClient;
pub use envelope::{RpcError, RpcRequest, RpcResponse, SERVER_ID, SERVER_TOPIC, reply_topic};
pub use server::serve;
