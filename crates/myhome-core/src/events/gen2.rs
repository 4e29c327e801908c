// `+/events/rpc`: Gen2+ notifications. Sources that are not Shelly ids
// (other MQTT clients sharing the topic space) are ignored.

use std::sync::Arc;

use myhome_api::{Message, MqttLink, Notification};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DeviceUpdate, SUBSCRIPTION_QUEUE, UpdateSender, forward};
use crate::error::CoreError;
use crate::model::is_shelly_id;

pub const TOPIC: &str = "+/events/rpc";

pub async fn spawn(
    link: &Arc<dyn MqttLink>,
    updates: UpdateSender,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, CoreError> {
    let rx = link.subscribe(cancel.clone(), TOPIC, SUBSCRIPTION_QUEUE).await?;
    Ok(forward("gen2", rx, updates, cancel, parse))
}

pub fn parse(msg: Message) -> Option<DeviceUpdate> {
    let note: Notification = match myhome_api::shelly::wire::decode(&msg.payload) {
        Ok(n) => n,
        Err(e) => {
            debug!(topic = %msg.topic, error = %e, "ignoring malformed notification");
            return None;
        }
    };
    if !is_shelly_id(&note.src) {
        debug!(src = %note.src, "ignoring notification from non-shelly source");
        return None;
    }
    Some(DeviceUpdate::Gen2(note))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_shelly_sources_only() {
        let ok = Message::new(
            "shellyplus1-a8032ab12345/events/rpc",
            r#"{"src":"shellyplus1-a8032ab12345","dst":"x","method":"NotifyStatus","params":{}}"#,
        );
        assert!(matches!(parse(ok), Some(DeviceUpdate::Gen2(n)) if n.method == "NotifyStatus"));

        let foreign = Message::new(
            "tasmota/events/rpc",
            r#"{"src":"tasmota-1","method":"NotifyStatus","params":{}}"#,
        );
        assert!(parse(foreign).is_none());
        assert!(parse(Message::new("x/events/rpc", "not json")).is_none());
    }
}
