// ── Shelly Gen2+ RPC frames ──
//
// Bit-compatible with the frames Shelly firmware publishes on
// `<device-id>/rpc`, `<requestor>/rpc` and `<device-id>/events/rpc`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// A request frame, published to `<device-id>/rpc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u32,
    pub src: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// The `{code, message}` error object carried by failed responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// A response frame, published by the device to `<requestor>/rpc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u32,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl Response {
    /// Unwrap the frame into its result, or the device error it carries.
    pub fn into_result(self) -> Result<Value, Error> {
        match self.error {
            Some(err) => Err(Error::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// An unsolicited notification (`NotifyStatus`, `NotifyFullStatus`,
/// `NotifyEvent`) published on `<device-id>/events/rpc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub src: String,
    #[serde(default)]
    pub dst: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Parse a JSON payload, keeping a preview of the body on failure.
pub fn decode<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(payload).map_err(|e| {
        let body = String::from_utf8_lossy(payload).into_owned();
        Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body,
        }
    })
}

pub(crate) fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_absent_params() {
        let req = Request {
            id: 7,
            src: "myhome-shellyplus1-aa".into(),
            method: "Shelly.GetStatus".into(),
            params: None,
        };
        let text = serde_json::to_string(&req).unwrap();
        assert_eq!(
            text,
            r#"{"id":7,"src":"myhome-shellyplus1-aa","method":"Shelly.GetStatus"}"#
        );
    }

    #[test]
    fn response_error_becomes_device_error() {
        let resp: Response = decode(
            br#"{"id":3,"src":"shellyplus1-aa","dst":"me","error":{"code":-103,"message":"Invalid argument"}}"#,
        )
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, Error::Rpc { code: -103, .. }));
    }

    #[test]
    fn response_without_result_is_null() {
        let resp: Response = decode(br#"{"id":3,"src":"a","dst":"b"}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn notification_parses_shelly_frame() {
        let n: Notification = decode(
            json!({
                "src": "shellyplus1-aa",
                "dst": "shellyplus1-aa/events",
                "method": "NotifyStatus",
                "params": {"ts": 1.0, "switch:0": {"output": true}}
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        assert_eq!(n.method, "NotifyStatus");
        assert_eq!(n.params["switch:0"]["output"], json!(true));
    }

    #[test]
    fn decode_failure_keeps_body() {
        let err = decode::<Response>(b"not json").unwrap_err();
        match err {
            Error::Deserialization { body, .. } => assert_eq!(body, "not json"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
