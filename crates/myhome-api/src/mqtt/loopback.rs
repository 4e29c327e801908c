// In-process MQTT link: publishes are routed straight back to local
// subscribers. Used when components talk to each other inside one
// process, and as the broker stand-in for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Message, MqttLink, SubscriptionTable};
use crate::error::Error;

pub struct LoopbackLink {
    client_id: String,
    connected: AtomicBool,
    subscriptions: Arc<SubscriptionTable>,
    published: Mutex<Vec<Message>>,
}

impl LoopbackLink {
    pub fn new(client_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            client_id: client_id.into(),
            connected: AtomicBool::new(true),
            subscriptions: Arc::new(SubscriptionTable::default()),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Everything published through this link so far.
    pub fn published(&self) -> Vec<Message> {
        self.published.lock().clone()
    }

    /// Messages published on topics matching `filter`.
    pub fn published_on(&self, filter: &str) -> Vec<Message> {
        self.published
            .lock()
            .iter()
            .filter(|m| super::topic_matches(filter, &m.topic))
            .cloned()
            .collect()
    }

    /// Deliver a message as if it had arrived from the broker.
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        self.subscriptions.dispatch(&Message::new(topic, payload))
    }
}

#[async_trait]
impl MqttLink for LoopbackLink {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::Mqtt("not connected".into()));
        }
        let msg = Message::new(topic, payload);
        self.published.lock().push(msg.clone());
        self.subscriptions.dispatch(&msg);
        Ok(())
    }

    async fn subscribe(
        &self,
        cancel: CancellationToken,
        filter: &str,
        qlen: usize,
    ) -> Result<mpsc::Receiver<Message>, Error> {
        let (tx, rx) = mpsc::channel(qlen.max(1));
        let (id, _) = self.subscriptions.add(filter, tx);
        let subscriptions = Arc::clone(&self.subscriptions);
        tokio::spawn(async move {
            cancel.cancelled().await;
            subscriptions.remove(id);
        });
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
