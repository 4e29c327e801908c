// Broker-backed MQTT link built on rumqttc.
//
// One background task polls the rumqttc event loop, tracks the
// connection state, re-issues every subscription on each ConnAck and
// fans incoming publishes out through the subscription table.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Message, MqttLink, SubscriptionTable};
use crate::error::Error;

const DEFAULT_PORT: u16 = 1883;
const REQUEST_CHANNEL_CAPACITY: usize = 64;
const MAX_PACKET_SIZE: usize = 1024 * 1024;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Connection settings for [`MqttClient`].
#[derive(Debug, Clone)]
pub struct MqttOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keep_alive: Duration,
}

impl MqttOptions {
    /// Build options from a `host[:port]` broker address. An empty address
    /// means `localhost:1883`; `mqtt://` and `tcp://` prefixes are accepted.
    pub fn new(broker: &str, client_id: impl Into<String>) -> Self {
        let (host, port) = parse_broker(broker);
        Self {
            host,
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }

    /// `host:port`, as advertised to devices.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_broker(broker: &str) -> (String, u16) {
    let trimmed = broker
        .trim()
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://")
        .trim_end_matches('/');
    if trimmed.is_empty() {
        return ("localhost".into(), DEFAULT_PORT);
    }
    match trimmed.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_owned(), port),
            Err(_) => (trimmed.to_owned(), DEFAULT_PORT),
        },
        None => (trimmed.to_owned(), DEFAULT_PORT),
    }
}

/// MQTT link to a real broker.
pub struct MqttClient {
    client: AsyncClient,
    client_id: String,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<SubscriptionTable>,
}

impl MqttClient {
    /// Start the client and its event loop task. The connection is
    /// established (and re-established) in the background until `cancel`
    /// fires; watch [`MqttLink::is_connected`] for the live state.
    pub fn start(options: &MqttOptions, cancel: CancellationToken) -> Arc<Self> {
        let mut mqtt = rumqttc::MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(true);
        mqtt.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(ref user) = options.username {
            let pass = options
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_owned())
                .unwrap_or_default();
            mqtt.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(mqtt, REQUEST_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let subscriptions = Arc::new(SubscriptionTable::default());

        info!(broker = %options.address(), client_id = %options.client_id, "starting MQTT client");
        tokio::spawn(event_loop_task(
            eventloop,
            client.clone(),
            Arc::clone(&subscriptions),
            Arc::clone(&connected),
            cancel,
        ));

        Arc::new(Self {
            client,
            client_id: options.client_id.clone(),
            connected,
            subscriptions,
        })
    }
}

#[async_trait]
impl MqttLink for MqttClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), Error> {
        self.client
            .publish_bytes(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        cancel: CancellationToken,
        filter: &str,
        qlen: usize,
    ) -> Result<mpsc::Receiver<Message>, Error> {
        let (tx, rx) = mpsc::channel(qlen.max(1));
        let (id, first) = self.subscriptions.add(filter, tx);
        if first {
            if let Err(e) = self.client.subscribe(filter, QoS::AtLeastOnce).await {
                self.subscriptions.remove(id);
                return Err(e.into());
            }
        }
        debug!(filter, "subscribed");

        let subscriptions = Arc::clone(&self.subscriptions);
        let client = self.client.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            if let Some(filter) = subscriptions.remove(id) {
                debug!(%filter, "unsubscribing");
                let _ = client.try_unsubscribe(filter);
            }
        });
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

async fn event_loop_task(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Arc<SubscriptionTable>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = client.try_disconnect();
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected.store(true, Ordering::Relaxed);
                    info!("MQTT connected");
                    // The broker forgets clean sessions: subscribe again.
                    for filter in subscriptions.filters() {
                        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                            warn!(%filter, error = %e, "re-subscribe failed");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.clone(),
                    };
                    subscriptions.dispatch(&msg);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    connected.store(false, Ordering::Relaxed);
                    warn!("MQTT broker sent disconnect");
                }
                Ok(_) => {}
                Err(e) => {
                    if connected.swap(false, Ordering::Relaxed) {
                        warn!(error = %e, "MQTT connection lost");
                    } else {
                        debug!(error = %e, "MQTT connection attempt failed");
                    }
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    debug!("MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::parse_broker;

    #[test]
    fn empty_broker_means_localhost() {
        assert_eq!(parse_broker(""), ("localhost".to_owned(), 1883));
    }

    #[test]
    fn broker_with_port_and_scheme() {
        assert_eq!(
            parse_broker("mqtt://192.168.1.2:1884"),
            ("192.168.1.2".to_owned(), 1884)
        );
        assert_eq!(parse_broker("broker.lan"), ("broker.lan".to_owned(), 1883));
    }
}
