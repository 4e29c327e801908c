// ── Event fan-in ──
//
// Producers turn MQTT topics and mDNS announcements into `DeviceUpdate`s
// and push them into the single bounded update channel. A full channel
// drops the update; the next event or refresh tick catches up.

pub mod blu;
pub mod gen1;
pub mod gen2;
pub mod mdns;

use std::net::Ipv4Addr;

use myhome_api::Notification;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::{BluEvent, MacAddress};

/// Capacity of the update channel.
pub const UPDATE_QUEUE: usize = 64;
/// Capacity of each producer's MQTT subscription.
pub const SUBSCRIPTION_QUEUE: usize = 16;

/// One observation about one device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceUpdate {
    /// A Gen2+ notification from `<id>/events/rpc`.
    Gen2(Notification),
    /// A Gen1 sensor reading from `shellies/<id>/sensor/<name>`.
    Gen1Sensor {
        id: String,
        sensor: String,
        value: f32,
    },
    /// A decoded BTHome frame relayed by a BLU gateway.
    Blu { mac: MacAddress, event: BluEvent },
    /// A Gen2+ device announced itself over mDNS.
    Discovered { id: String, ip: Ipv4Addr },
    /// Re-fetch a device's info, config and status.
    Refresh { id: String },
}

impl DeviceUpdate {
    pub fn device_id(&self) -> String {
        match self {
            Self::Gen2(n) => crate::model::normalize_id(&n.src),
            Self::Gen1Sensor { id, .. } | Self::Discovered { id, .. } | Self::Refresh { id } => {
                id.clone()
            }
            Self::Blu { mac, .. } => crate::model::blu_id(mac),
        }
    }
}

/// Non-blocking handle on the update channel.
#[derive(Debug, Clone)]
pub struct UpdateSender {
    tx: mpsc::Sender<DeviceUpdate>,
}

impl UpdateSender {
    pub fn channel() -> (Self, mpsc::Receiver<DeviceUpdate>) {
        let (tx, rx) = mpsc::channel(UPDATE_QUEUE);
        (Self { tx }, rx)
    }

    /// Queue an update; returns `false` when it was dropped.
    pub fn offer(&self, update: DeviceUpdate) -> bool {
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(u)) => {
                debug!(device = %u.device_id(), "update channel full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Drain `rx`, converting each item and offering it to the updater.
pub(crate) fn forward<T, F>(
    source: &'static str,
    mut rx: mpsc::Receiver<T>,
    updates: UpdateSender,
    cancel: CancellationToken,
    convert: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T) -> Option<DeviceUpdate> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                item = rx.recv() => {
                    let Some(item) = item else { break };
                    if let Some(update) = convert(item) {
                        updates.offer(update);
                    }
                }
            }
        }
        debug!(source, "event producer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = UpdateSender::channel();
        for i in 0..UPDATE_QUEUE {
            assert!(tx.offer(DeviceUpdate::Refresh { id: format!("d{i}") }));
        }
        assert!(!tx.offer(DeviceUpdate::Refresh { id: "late".into() }));
        assert_eq!(
            rx.recv().await,
            Some(DeviceUpdate::Refresh { id: "d0".into() })
        );
    }
}
