// ── MQTT RPC server ──

use std::sync::Arc;

use bytes::Bytes;
use myhome_api::{Message, MqttLink};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::broker::Broker;
use super::envelope::{RpcRequest, RpcResponse, SERVER_TOPIC, reply_topic};
use crate::error::CoreError;

/// Answer requests on `myhome/rpc` until `cancel` fires.
///
/// Each request runs in its own task so a slow verb never holds up the
/// subscription.
pub async fn serve(
    link: Arc<dyn MqttLink>,
    broker: Arc<Broker>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, CoreError> {
    let mut rx = link.subscribe(cancel.clone(), SERVER_TOPIC, 16).await?;
    debug!(topic = SERVER_TOPIC, "rpc server listening");

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let link = Arc::clone(&link);
                    let broker = Arc::clone(&broker);
                    tokio::spawn(async move {
                        handle(link.as_ref(), &broker, msg).await;
                    });
                }
            }
        }
    }))
}

async fn handle(link: &dyn MqttLink, broker: &Broker, msg: Message) {
    let req: RpcRequest = match serde_json::from_slice(&msg.payload) {
        Ok(req) => req,
        Err(e) => {
            let Some(req) = salvage(&msg.payload) else {
                warn!(error = %e, "dropping malformed rpc request");
                return;
            };
            debug!(src = %req.src, error = %e, "rejecting malformed rpc request");
            let err = CoreError::Protocol {
                message: format!("invalid request: {e}"),
            };
            reply(link, &req, Err(err)).await;
            return;
        }
    };

    let outcome = match req.validate() {
        Ok(()) => broker.call(&req.method, req.params.clone()).await,
        Err(e) => Err(e),
    };
    if req.src.is_empty() {
        warn!(method = %req.method, "rpc request without src, no reply possible");
        return;
    }
    if let Err(e) = &outcome {
        debug!(method = %req.method, src = %req.src, error = %e, "rpc failed");
    }
    reply(link, &req, outcome).await;
}

/// The dialog of a request that did not decode, when its `id` and `src`
/// survive well enough to address an error reply.
fn salvage(payload: &[u8]) -> Option<RpcRequest> {
    let raw: Value = serde_json::from_slice(payload).ok()?;
    let field = |name: &str| match raw.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    Some(RpcRequest {
        id: field("id")?,
        src: field("src")?,
        dst: field("dst").unwrap_or_default(),
        method: String::new(),
        params: Value::Null,
    })
}

async fn reply(link: &dyn MqttLink, req: &RpcRequest, outcome: Result<Value, CoreError>) {
    let resp = RpcResponse::reply(req, outcome);
    let payload = match serde_json::to_vec(&resp) {
        Ok(p) => Bytes::from(p),
        Err(e) => {
            warn!(error = %e, "cannot encode rpc response");
            return;
        }
    };
    if let Err(e) = link.publish(&reply_topic(&req.src), payload).await {
        warn!(src = %req.src, error = %e, "cannot publish rpc response");
    }
}
