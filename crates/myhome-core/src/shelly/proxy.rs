// ── Per-device Shelly proxy ──
//
// One proxy per Gen2+ device. It owns the device's reply inbox
// (`<src>/rpc`) and its outbound queue; a single drainer task publishes
// queued requests so MQTT calls to one device stay in FIFO order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use bytes::Bytes;
use myhome_api::shelly::methods::{ListMethods, MethodList};
use myhome_api::{Message, Method, MqttLink, Request, Response, ShellyHttpClient};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Channel, DeviceRpc, MethodTable};
use crate::error::CoreError;

type Reply = Result<Response, CoreError>;
type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<Reply>>>>;

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Per-call deadline on the MQTT channel.
    pub timeout: Duration,
    /// Delay before the first MQTT call after the inbox subscription.
    pub grace: Duration,
    pub queue: usize,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(14),
            grace: Duration::from_secs(2),
            queue: 16,
        }
    }
}

struct Outgoing {
    id: u32,
    topic: String,
    payload: Bytes,
}

pub struct ShellyProxy {
    id: String,
    src: String,
    host: ArcSwap<String>,
    http: ShellyHttpClient,
    outbox: mpsc::Sender<Outgoing>,
    pending: Pending,
    next_id: AtomicU32,
    preferred: Mutex<Channel>,
    methods: ArcSwapOption<MethodTable>,
    methods_probed: AtomicBool,
    ready_at: Instant,
    opts: ProxyOptions,
    cancel: CancellationToken,
}

impl ShellyProxy {
    /// Subscribe the device inbox and start the drainer and inbox tasks.
    pub async fn start(
        id: &str,
        host: &str,
        http: ShellyHttpClient,
        link: Arc<dyn MqttLink>,
        opts: ProxyOptions,
        cancel: &CancellationToken,
    ) -> Result<Arc<Self>, CoreError> {
        let cancel = cancel.child_token();
        let src = format!("{}-{id}", link.client_id());
        let inbox = link
            .subscribe(cancel.clone(), &format!("{src}/rpc"), opts.queue)
            .await?;
        let (outbox, queue) = mpsc::channel(opts.queue.max(1));
        let pending: Pending = Arc::default();

        tokio::spawn(outbox_task(
            link,
            queue,
            Arc::clone(&pending),
            cancel.clone(),
        ));
        tokio::spawn(inbox_task(inbox, Arc::clone(&pending), cancel.clone()));

        let preferred = if host.is_empty() {
            Channel::Mqtt
        } else {
            Channel::Http
        };
        debug!(device = id, src = %src, channel = %preferred, "shelly proxy started");

        Ok(Arc::new(Self {
            id: id.to_owned(),
            src,
            host: ArcSwap::from_pointee(host.to_owned()),
            http,
            outbox,
            pending,
            next_id: AtomicU32::new(1),
            preferred: Mutex::new(preferred),
            methods: ArcSwapOption::empty(),
            methods_probed: AtomicBool::new(false),
            ready_at: Instant::now() + opts.grace,
            opts,
            cancel,
        }))
    }

    pub fn host(&self) -> Arc<String> {
        self.host.load_full()
    }

    /// Point the HTTP channel at a new address.
    pub fn set_host(&self, host: &str) {
        if self.host.load().as_str() == host {
            return;
        }
        debug!(device = %self.id, host, "device host changed");
        self.host.store(Arc::new(host.to_owned()));
        if !host.is_empty() {
            *self.preferred.lock() = Channel::Http;
        }
        self.methods_probed.store(false, Ordering::Relaxed);
    }

    pub fn preferred_channel(&self) -> Channel {
        *self.preferred.lock()
    }

    pub fn methods(&self) -> Option<Arc<MethodTable>> {
        self.methods.load_full()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Fetch the verb table once per host; failures leave calls ungated.
    async fn ensure_methods(&self) {
        if self.methods.load().is_some() || self.methods_probed.swap(true, Ordering::Relaxed) {
            return;
        }
        let listed = self
            .dispatch(Channel::Default, ListMethods::NAME, None)
            .await
            .and_then(|v| Ok(serde_json::from_value::<MethodList>(v)?));
        match listed {
            Ok(list) => {
                let table = MethodTable::new(&list.methods);
                debug!(device = %self.id, methods = table.len(), "method table loaded");
                self.methods.store(Some(Arc::new(table)));
            }
            Err(e) => debug!(device = %self.id, error = %e, "ListMethods failed, calls ungated"),
        }
    }

    async fn dispatch(
        &self,
        channel: Channel,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CoreError> {
        if channel != Channel::Default {
            return self.via(channel, method, params).await;
        }
        let first = self.preferred_channel();
        match self.via(first, method, params.clone()).await {
            Err(e) if e.is_transient() => {
                let second = match first {
                    Channel::Http => Channel::Mqtt,
                    _ => Channel::Http,
                };
                debug!(device = %self.id, method, from = %first, to = %second, error = %e, "channel fallback");
                let value = self.via(second, method, params).await?;
                *self.preferred.lock() = second;
                Ok(value)
            }
            other => other,
        }
    }

    async fn via(
        &self,
        channel: Channel,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CoreError> {
        match channel {
            Channel::Http => self.call_http(method, params.as_ref()).await,
            Channel::Mqtt | Channel::Default => self.call_mqtt(method, params).await,
        }
    }

    async fn call_http(&self, method: &str, params: Option<&Value>) -> Result<Value, CoreError> {
        let host = self.host.load_full();
        if host.is_empty() {
            return Err(CoreError::Transport {
                message: format!("{} has no known host", self.id),
            });
        }
        Ok(self.http.call_raw(&host, method, params).await?)
    }

    async fn call_mqtt(&self, method: &str, params: Option<Value>) -> Result<Value, CoreError> {
        tokio::time::sleep_until(self.ready_at).await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = Request {
            id,
            src: self.src.clone(),
            method: method.to_owned(),
            params,
        };
        let payload = Bytes::from(serde_json::to_vec(&req)?);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _forget = Forget {
            pending: &self.pending,
            id,
        };

        let queued = self
            .outbox
            .send(Outgoing {
                id,
                topic: format!("{}/rpc", self.id),
                payload,
            })
            .await;
        if queued.is_err() {
            return Err(CoreError::Transport {
                message: format!("proxy for {} stopped", self.id),
            });
        }

        match tokio::time::timeout(self.opts.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply?.into_result()?),
            Ok(Err(_)) => Err(CoreError::Transport {
                message: format!("proxy for {} stopped", self.id),
            }),
            Err(_) => Err(CoreError::Timeout {
                operation: format!("{} {method}", self.id),
                timeout_ms: u64::try_from(self.opts.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

/// Drops a request's reply slot once its caller stops waiting, whether
/// it returned or was cancelled.
struct Forget<'a> {
    pending: &'a Pending,
    id: u32,
}

impl Drop for Forget<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

#[async_trait]
impl DeviceRpc for ShellyProxy {
    fn device_id(&self) -> &str {
        &self.id
    }

    async fn call_raw(
        &self,
        channel: Channel,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CoreError> {
        if method != ListMethods::NAME {
            self.ensure_methods().await;
            if let Some(table) = self.methods.load_full() {
                if !table.supports(method) {
                    return Err(CoreError::MethodNotSupported {
                        device: self.id.clone(),
                        method: method.to_owned(),
                    });
                }
            }
        }
        self.dispatch(channel, method, params).await
    }
}

impl Drop for ShellyProxy {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background tasks ────────────────────────────────────────────────

async fn outbox_task(
    link: Arc<dyn MqttLink>,
    mut queue: mpsc::Receiver<Outgoing>,
    pending: Pending,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            out = queue.recv() => {
                let Some(out) = out else { break };
                if let Err(e) = link.publish(&out.topic, out.payload).await {
                    warn!(topic = %out.topic, error = %e, "device request not published");
                    if let Some(tx) = pending.lock().remove(&out.id) {
                        let _ = tx.send(Err(e.into()));
                    }
                }
            }
        }
    }
}

async fn inbox_task(mut inbox: mpsc::Receiver<Message>, pending: Pending, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = inbox.recv() => {
                let Some(msg) = msg else { break };
                let resp: Response = match myhome_api::shelly::wire::decode(&msg.payload) {
                    Ok(r) => r,
                    Err(e) => {
                        debug!(topic = %msg.topic, error = %e, "ignoring malformed device reply");
                        continue;
                    }
                };
                match pending.lock().remove(&resp.id) {
                    Some(tx) => {
                        let _ = tx.send(Ok(resp));
                    }
                    None => debug!(id = resp.id, "late or unknown device reply"),
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use myhome_api::LoopbackLink;

    use super::*;

    async fn silent_proxy(cancel: &CancellationToken) -> Arc<ShellyProxy> {
        let opts = ProxyOptions {
            timeout: Duration::from_secs(2),
            grace: Duration::ZERO,
            queue: 4,
        };
        let http = ShellyHttpClient::with_client(reqwest::Client::new());
        ShellyProxy::start("shellyplus1-a", "", http, LoopbackLink::new("myhome"), opts, cancel)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_calls_leave_no_reply_slot() {
        let cancel = CancellationToken::new();
        let proxy = silent_proxy(&cancel).await;

        let err = proxy.call_mqtt("Switch.Toggle", None).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        assert!(proxy.pending.lock().is_empty());

        // The caller gives up before the proxy's own deadline.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            proxy.call_mqtt("Switch.Toggle", None),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(proxy.pending.lock().is_empty());
        cancel.cancel();
    }
}
