// `shelly-blu/events/#`: BTHome frames relayed by BLU gateways.

use std::sync::Arc;

use myhome_api::{Message, MqttLink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DeviceUpdate, SUBSCRIPTION_QUEUE, UpdateSender, forward};
use crate::error::CoreError;
use crate::model::{BluEvent, MacAddress};

pub const TOPIC: &str = "shelly-blu/events/#";

pub async fn spawn(
    link: &Arc<dyn MqttLink>,
    updates: UpdateSender,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, CoreError> {
    let rx = link.subscribe(cancel.clone(), TOPIC, SUBSCRIPTION_QUEUE).await?;
    Ok(forward("blu", rx, updates, cancel, parse))
}

pub fn parse(msg: Message) -> Option<DeviceUpdate> {
    let event: BluEvent = match myhome_api::shelly::wire::decode(&msg.payload) {
        Ok(e) => e,
        Err(e) => {
            debug!(topic = %msg.topic, error = %e, "ignoring malformed BLU frame");
            return None;
        }
    };
    let mac = event.address.as_deref().and_then(|a| MacAddress::parse(a).ok());
    let Some(mac) = mac else {
        debug!(topic = %msg.topic, "BLU frame without a usable address");
        return None;
    };
    Some(DeviceUpdate::Blu { mac, event })
}
