// ── MyHome RPC envelope ──
//
// Requests arrive on `myhome/rpc` as `{id, src, dst, method, params}`
// and are answered on `myhome/<src>/rpc`. The dialog fields (`id`,
// `src`, `dst`) must all be non-empty.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

pub const SERVER_ID: &str = "myhome";
pub const SERVER_TOPIC: &str = "myhome/rpc";

/// Inbox topic for replies to `src`.
pub fn reply_topic(src: &str) -> String {
    format!("{SERVER_ID}/{src}/rpc")
}

/// Random 16-character alphanumeric request id.
pub fn request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub dst: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(src: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: request_id(),
            src: src.into(),
            dst: SERVER_ID.into(),
            method: method.into(),
            params,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let missing = [("id", &self.id), ("src", &self.src), ("dst", &self.dst)]
            .into_iter()
            .find(|(_, v)| v.is_empty());
        match missing {
            Some((field, _)) => Err(CoreError::InvalidDialog {
                reason: format!("empty {field}"),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl From<&CoreError> for RpcError {
    fn from(err: &CoreError) -> Self {
        Self {
            code: err.rpc_code(),
            message: err.to_string(),
        }
    }
}

impl From<RpcError> for CoreError {
    fn from(err: RpcError) -> Self {
        Self::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    pub src: String,
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn reply(req: &RpcRequest, outcome: Result<Value, CoreError>) -> Self {
        let (result, error) = match outcome {
            Ok(v) => (Some(v), None),
            Err(e) => (None, Some(RpcError::from(&e))),
        };
        Self {
            id: req.id.clone(),
            src: SERVER_ID.into(),
            dst: req.src.clone(),
            result,
            error,
        }
    }

    pub fn into_result(self) -> Result<Value, CoreError> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn request_ids_are_sixteen_alnum() {
        let id = request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, request_id());
    }

    #[test]
    fn empty_dialog_fields_are_rejected() {
        let mut req = RpcRequest::new("cli-1", "device.list", Value::Null);
        assert!(req.validate().is_ok());
        req.src.clear();
        let err = req.validate().unwrap_err();
        assert_eq!(err.rpc_code(), 1);
    }

    #[test]
    fn error_reply_round_trips_to_typed_kind() {
        let req = RpcRequest::new("cli-1", "nope.nope", Value::Null);
        let resp = RpcResponse::reply(
            &req,
            Err(CoreError::MethodNotFound {
                method: "nope.nope".into(),
            }),
        );
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["error"]["code"], json!(-32601));
        assert_eq!(wire["dst"], json!("cli-1"));
        assert!(wire.get("result").is_none());

        let err = resp.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
