// ── MQTT publish/subscribe ──
//
// `MqttLink` is the seam every daemon component talks through. The
// broker-backed `MqttClient` and the in-process `LoopbackLink` share the
// same subscription table, so wildcard routing and slow-consumer
// handling behave identically in tests and in production.

mod client;
mod loopback;
mod watchdog;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;

pub use client::{MqttClient, MqttOptions};
pub use loopback::LoopbackLink;
pub use watchdog::watchdog;

/// One message as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Publish/subscribe access to a broker.
#[async_trait]
pub trait MqttLink: Send + Sync {
    /// The MQTT client id, also used as the prefix for reply inboxes.
    fn client_id(&self) -> &str;

    /// Publish with QoS 1. Returns once the client accepted the packet.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), Error>;

    /// Subscribe to a topic filter (`+` and `#` wildcards supported).
    ///
    /// The receiver holds at most `qlen` messages; further messages are
    /// dropped until the consumer catches up. The subscription ends and
    /// the receiver closes when `cancel` fires.
    async fn subscribe(
        &self,
        cancel: CancellationToken,
        filter: &str,
        qlen: usize,
    ) -> Result<mpsc::Receiver<Message>, Error>;

    /// Live connection state as last observed.
    fn is_connected(&self) -> bool;
}

/// MQTT topic filter matching.
///
/// `+` matches exactly one level, `#` matches the remaining levels
/// (including none) and must be last.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

// ── Subscription table ──────────────────────────────────────────────

struct Subscriber {
    id: u64,
    filter: String,
    tx: mpsc::Sender<Message>,
}

/// Fan-out of incoming messages to every matching subscriber.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SubscriptionTable {
    /// Register a subscriber. Returns its id and whether the filter is new.
    pub(crate) fn add(&self, filter: &str, tx: mpsc::Sender<Message>) -> (u64, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock();
        let first = !subs.iter().any(|s| s.filter == filter);
        subs.push(Subscriber {
            id,
            filter: filter.to_owned(),
            tx,
        });
        (id, first)
    }

    /// Drop a subscriber. Returns its filter when no one else uses it.
    pub(crate) fn remove(&self, id: u64) -> Option<String> {
        let mut subs = self.subscribers.lock();
        let pos = subs.iter().position(|s| s.id == id)?;
        let removed = subs.swap_remove(pos);
        let orphaned = !subs.iter().any(|s| s.filter == removed.filter);
        orphaned.then_some(removed.filter)
    }

    /// Every distinct filter, for re-subscribing after a reconnect.
    pub(crate) fn filters(&self) -> Vec<String> {
        let subs = self.subscribers.lock();
        let mut filters: Vec<String> = subs.iter().map(|s| s.filter.clone()).collect();
        filters.sort();
        filters.dedup();
        filters
    }

    /// Deliver to every matching subscriber without blocking.
    /// Returns the number of subscribers that accepted the message.
    pub(crate) fn dispatch(&self, msg: &Message) -> usize {
        let mut delivered = 0;
        let mut subs = self.subscribers.lock();
        subs.retain(|sub| {
            if !topic_matches(&sub.filter, &msg.topic) {
                return true;
            }
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(topic = %msg.topic, filter = %sub.filter, "subscriber queue full, dropping message");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        delivered
    }
}
