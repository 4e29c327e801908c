// Shelly HTTP RPC client
//
// Gen2+ firmware serves every RPC verb at `POST /rpc/<Method>`. A
// successful call answers with the bare result; a failed one answers
// with a non-2xx status and a `{code, message}` body.

use serde_json::Value;
use tracing::debug;

use crate::error::Error;
use crate::shelly::methods::Method;
use crate::shelly::wire::{RpcErrorBody, decode, preview};
use crate::transport::TransportConfig;

/// JSON-RPC over HTTP to any device reachable by host or IPv4.
#[derive(Clone)]
pub struct ShellyHttpClient {
    http: reqwest::Client,
}

impl ShellyHttpClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// `http://<host>/rpc/<method>`; `host` may carry a port.
    pub fn rpc_url(host: &str, method: &str) -> String {
        format!("http://{host}/rpc/{method}")
    }

    /// Call a verb with untyped params and return the untyped result.
    pub async fn call_raw(
        &self,
        host: &str,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, Error> {
        let url = Self::rpc_url(host, method);
        debug!("POST {url}");

        let mut builder = self.http.post(&url);
        if let Some(params) = params.filter(|p| !p.is_null()) {
            builder = builder.json(params);
        }
        let resp = builder.send().await.map_err(Error::Transport)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(Error::Transport)?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_slice::<RpcErrorBody>(&body) {
                return Err(Error::Rpc {
                    code: err.code,
                    message: err.message,
                });
            }
            let text = String::from_utf8_lossy(&body);
            return Err(Error::Http {
                status: status.as_u16(),
                body: preview(&text).to_owned(),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        decode(&body)
    }

    /// Call a typed verb.
    pub async fn call<M: Method>(&self, host: &str, params: &M::Params) -> Result<M::Result, Error> {
        let params = serde_json::to_value(params).map_err(|e| Error::Deserialization {
            message: format!("cannot encode {} params: {e}", M::NAME),
            body: String::new(),
        })?;
        let value = self.call_raw(host, M::NAME, Some(&params)).await?;
        from_result::<M>(value)
    }
}

/// Decode a raw result into a verb's typed result.
pub fn from_result<M: Method>(value: Value) -> Result<M::Result, Error> {
    serde_json::from_value(value.clone()).map_err(|e| Error::Deserialization {
        message: format!("{}: {e}", M::NAME),
        body: value.to_string(),
    })
}
