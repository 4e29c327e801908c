// `shellies/<id>/sensor/<name>`: Gen1 sensors publish one float per
// topic. The Gen1 HTTP callback endpoint republishes onto the same
// topics, so both paths share this producer.

use std::sync::Arc;

use myhome_api::{Message, MqttLink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DeviceUpdate, SUBSCRIPTION_QUEUE, UpdateSender, forward};
use crate::error::CoreError;
use crate::model::normalize_id;

pub const TOPIC: &str = "shellies/+/sensor/#";

pub fn sensor_topic(id: &str, sensor: &str) -> String {
    format!("shellies/{id}/sensor/{sensor}")
}

pub async fn spawn(
    link: &Arc<dyn MqttLink>,
    updates: UpdateSender,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, CoreError> {
    let rx = link.subscribe(cancel.clone(), TOPIC, SUBSCRIPTION_QUEUE).await?;
    Ok(forward("gen1", rx, updates, cancel, parse))
}

pub fn parse(msg: Message) -> Option<DeviceUpdate> {
    let mut levels = msg.topic.split('/');
    let (Some("shellies"), Some(id), Some("sensor")) = (levels.next(), levels.next(), levels.next())
    else {
        return None;
    };
    let sensor = levels.collect::<Vec<_>>().join("/");
    if id.is_empty() || sensor.is_empty() {
        return None;
    }
    let value = match std::str::from_utf8(&msg.payload)
        .ok()
        .and_then(|s| s.trim().parse::<f32>().ok())
    {
        Some(v) => v,
        None => {
            debug!(topic = %msg.topic, "ignoring non-numeric sensor payload");
            return None;
        }
    };
    Some(DeviceUpdate::Gen1Sensor {
        id: normalize_id(id),
        sensor,
        value,
    })
}
