// ── Talking to Shelly devices ──
//
// `DeviceRpc` is the seam between the daemon logic (refresh, setup,
// script versioning) and the transports. `ShellyProxy` implements it
// over HTTP and MQTT; tests substitute an in-memory device.

pub mod methods;
pub mod pool;
pub mod proxy;

use std::sync::Arc;

use async_trait::async_trait;
use myhome_api::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::CoreError;
use crate::model::Device;

pub use methods::MethodTable;
pub use pool::ProxyPool;
pub use proxy::{ProxyOptions, ShellyProxy};

/// Which transport a call should use.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    Http,
    Mqtt,
    /// The last channel that worked, falling back to the other one.
    #[default]
    Default,
}

#[async_trait]
pub trait DeviceRpc: Send + Sync {
    fn device_id(&self) -> &str;

    async fn call_raw(
        &self,
        channel: Channel,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CoreError>;
}

/// Hands out an RPC endpoint for a device record.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, device: &Device) -> Result<Arc<dyn DeviceRpc>, CoreError>;
}

/// Call a typed verb on the default channel.
pub async fn call<M: Method>(
    rpc: &(impl DeviceRpc + ?Sized),
    params: &M::Params,
) -> Result<M::Result, CoreError> {
    call_on::<M>(rpc, Channel::Default, params).await
}

pub async fn call_on<M: Method>(
    rpc: &(impl DeviceRpc + ?Sized),
    channel: Channel,
    params: &M::Params,
) -> Result<M::Result, CoreError> {
    let params = serde_json::to_value(params)?;
    let params = match params {
        Value::Object(ref map) if map.is_empty() => None,
        Value::Null => None,
        other => Some(other),
    };
    let value = rpc.call_raw(channel, M::NAME, params).await?;
    Ok(myhome_api::shelly::http::from_result::<M>(value)?)
}
