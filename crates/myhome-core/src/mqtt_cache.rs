// ── Last-message cache for MQTT replay ──
//
// Keeps the most recent payload per topic under a byte budget. Cost of
// an entry is topic length plus payload length; eviction is silent.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use myhome_api::{Message, MqttLink};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub weighted_size: u64,
    pub budget: u64,
}

pub struct MessageCache {
    inner: Cache<String, CachedMessage>,
    budget: u64,
}

impl MessageCache {
    pub fn new(budget_bytes: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(budget_bytes)
            .weigher(|topic: &String, msg: &CachedMessage| {
                u32::try_from(topic.len() + msg.payload.len()).unwrap_or(u32::MAX)
            })
            .build();
        Self {
            inner,
            budget: budget_bytes,
        }
    }

    pub fn insert(&self, msg: &Message) {
        self.inner.insert(
            msg.topic.clone(),
            CachedMessage {
                payload: msg.payload.clone(),
                received_at: Utc::now(),
            },
        );
    }

    /// The last payload seen on `topic`, if any.
    pub fn get(&self, topic: &str) -> Option<CachedMessage> {
        self.inner.get(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.iter().map(|(k, _)| (*k).clone()).collect();
        topics.sort();
        topics
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks();
        CacheStats {
            entries: self.inner.entry_count(),
            weighted_size: self.inner.weighted_size(),
            budget: self.budget,
        }
    }

    /// Republish the cached payload on its own topic.
    pub async fn replay(&self, link: &dyn MqttLink, topic: &str) -> Result<(), CoreError> {
        let cached = self
            .get(topic)
            .ok_or_else(|| CoreError::not_found("cached topic", topic))?;
        link.publish(topic, cached.payload).await?;
        debug!(topic, "replayed cached message");
        Ok(())
    }

    /// Feed the cache from a subscription until `cancel` fires.
    pub async fn spawn(
        self: Arc<Self>,
        link: Arc<dyn MqttLink>,
        filter: &str,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, CoreError> {
        let mut rx = link.subscribe(cancel.clone(), filter, 16).await?;
        let filter = filter.to_owned();
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else {
                            warn!(filter, "cache subscription closed");
                            break;
                        };
                        self.insert(&msg);
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use myhome_api::LoopbackLink;

    #[test]
    fn unseen_topic_returns_nothing() {
        let cache = MessageCache::new(1024);
        assert!(cache.get("shelly-blu/events/x").is_none());
    }

    #[test]
    fn keeps_latest_payload_per_topic() {
        let cache = MessageCache::new(1024);
        cache.insert(&Message::new("shelly-blu/events/a", "1"));
        cache.insert(&Message::new("shelly-blu/events/a", "2"));
        assert_eq!(cache.get("shelly-blu/events/a").unwrap().payload, "2");
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.weighted_size, 20);
    }

    #[test]
    fn budget_bounds_weighted_size() {
        let cache = MessageCache::new(256);
        for i in 0..100 {
            cache.insert(&Message::new(format!("t/{i}"), vec![0u8; 32]));
        }
        assert!(cache.stats().weighted_size <= 256);
    }

    #[tokio::test]
    async fn replay_republishes_on_same_topic() {
        let link = LoopbackLink::new("cache-test");
        let cache = Arc::new(MessageCache::new(1024));
        let cancel = CancellationToken::new();
        let _task = Arc::clone(&cache)
            .spawn(link.clone(), "shelly-blu/#", cancel.clone())
            .await
            .unwrap();

        link.inject("shelly-blu/events/aa", "{\"temperature\":21}");
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while cache.get("shelly-blu/events/aa").is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        cache
            .replay(link.as_ref(), "shelly-blu/events/aa")
            .await
            .unwrap();
        let sent = link.published_on("shelly-blu/events/aa");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, "{\"temperature\":21}");

        assert!(cache.replay(link.as_ref(), "shelly-blu/none").await.is_err());
        cancel.cancel();
    }
}
