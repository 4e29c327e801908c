// ── MQTT RPC client ──
//
// Used by the CLI and by other daemons. Replies land on the client's
// own inbox `myhome/<client-id>/rpc` and are matched by request id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use myhome_api::MqttLink;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::envelope::{RpcRequest, RpcResponse, SERVER_TOPIC, reply_topic};
use crate::error::CoreError;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<RpcResponse>>>>;

pub struct RpcClient {
    link: Arc<dyn MqttLink>,
    src: String,
    timeout: Duration,
    pending: Pending,
    cancel: CancellationToken,
}

impl RpcClient {
    /// Subscribe to the reply inbox and start matching replies.
    pub async fn connect(
        link: Arc<dyn MqttLink>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, CoreError> {
        let cancel = cancel.child_token();
        let src = link.client_id().to_owned();
        let mut rx = link.subscribe(cancel.clone(), &reply_topic(&src), 16).await?;
        let pending: Pending = Arc::default();

        let inbox = Arc::clone(&pending);
        let stop = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        let resp: RpcResponse = match serde_json::from_slice(&msg.payload) {
                            Ok(r) => r,
                            Err(e) => {
                                debug!(error = %e, "ignoring malformed rpc reply");
                                continue;
                            }
                        };
                        match inbox.lock().remove(&resp.id) {
                            Some(tx) => {
                                let _ = tx.send(resp);
                            }
                            None => debug!(id = %resp.id, "reply for unknown request"),
                        }
                    }
                }
            }
        });

        Ok(Self {
            link,
            src,
            timeout,
            pending,
            cancel,
        })
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, CoreError> {
        let req = RpcRequest::new(&self.src, method, params);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(req.id.clone(), tx);

        let payload = Bytes::from(serde_json::to_vec(&req)?);
        if let Err(e) = self.link.publish(SERVER_TOPIC, payload).await {
            self.pending.lock().remove(&req.id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp.into_result(),
            Ok(Err(_)) => Err(CoreError::Transport {
                message: "rpc client stopped".into(),
            }),
            Err(_) => {
                self.pending.lock().remove(&req.id);
                Err(CoreError::Timeout {
                    operation: method.to_owned(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    pub async fn call_typed<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<R, CoreError> {
        let value = self.call(method, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rpc::broker::{Broker, Empty};
    use crate::rpc::server::serve;
    use myhome_api::LoopbackLink;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Echo {
        text: String,
    }

    async fn setup() -> (Arc<LoopbackLink>, RpcClient, CancellationToken) {
        let link = LoopbackLink::new("cli-test");
        let broker = Broker::builder()
            .register("test.echo", |p: Echo| async move { Ok(json!({"echo": p.text})) })
            .register("test.fail", |_: Empty| async {
                Err::<Value, _>(CoreError::not_found("device", "x"))
            })
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        serve(link.clone(), Arc::new(broker), cancel.clone())
            .await
            .unwrap();
        let client = RpcClient::connect(link.clone(), Duration::from_secs(2), &cancel)
            .await
            .unwrap();
        (link, client, cancel)
    }

    #[tokio::test]
    async fn request_round_trips_over_mqtt() {
        let (link, client, _cancel) = setup().await;
        let out = client.call("test.echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, json!({"echo": "hi"}));

        let sent = link.published_on("myhome/rpc");
        let req: RpcRequest = serde_json::from_slice(&sent[0].payload).unwrap();
        let replies = link.published_on("myhome/cli-test/rpc");
        let resp: RpcResponse = serde_json::from_slice(&replies[0].payload).unwrap();
        assert_eq!(resp.id, req.id);
        assert_eq!(resp.src, "myhome");
        assert_eq!(resp.dst, "cli-test");
    }

    #[tokio::test]
    async fn handler_errors_come_back_typed() {
        let (_link, client, _cancel) = setup().await;
        let err = client.call("test.fail", Value::Null).await.unwrap_err();
        assert_eq!(err.rpc_code(), -32004);
        let err = client.call("test.nope", Value::Null).await.unwrap_err();
        assert_eq!(err.rpc_code(), -32601);
    }

    #[tokio::test]
    async fn invalid_dialog_gets_code_one() {
        let (link, _client, _cancel) = setup().await;
        let mut inbox = link
            .subscribe(CancellationToken::new(), "myhome/other/rpc", 4)
            .await
            .unwrap();
        let bad = json!({"id": "", "src": "other", "dst": "myhome", "method": "test.echo"});
        link.publish("myhome/rpc", Bytes::from(bad.to_string()))
            .await
            .unwrap();
        let msg = inbox.recv().await.unwrap();
        let resp: RpcResponse = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(resp.error.unwrap().code, 1);
    }
}
