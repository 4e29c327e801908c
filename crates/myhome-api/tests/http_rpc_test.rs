#![allow(clippy::unwrap_used)]
// Integration tests for `ShellyHttpClient` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use myhome_api::shelly::methods::{
    GetDeviceInfo, KvsGet, KvsKey, NoParams, ScriptList, SysConfigPatch, SysDevice,
    SysSetConfig, SysSetConfigParams,
};
use myhome_api::{Error, ShellyHttpClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ShellyHttpClient, String) {
    let server = MockServer::start().await;
    let host = server.address().to_string();
    let client = ShellyHttpClient::with_client(reqwest::Client::new());
    (server, client, host)
}

// ── Typed calls ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_device_info() {
    let (server, client, host) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rpc/Shelly.GetDeviceInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "shelly1minig3-54320464a1d0",
            "mac": "54320464A1D0",
            "gen": 3,
            "ver": "1.4.4"
        })))
        .mount(&server)
        .await;

    let info = client
        .call::<GetDeviceInfo>(&host, &NoParams {})
        .await
        .unwrap();
    assert_eq!(info["id"], "shelly1minig3-54320464a1d0");
    assert_eq!(info["gen"], 3);
}

#[tokio::test]
async fn test_set_config_sends_params_body() {
    let (server, client, host) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rpc/Sys.SetConfig"))
        .and(body_json(json!({"config": {"device": {"name": "porch"}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"restart_required": false})))
        .expect(1)
        .mount(&server)
        .await;

    let params = SysSetConfigParams {
        config: SysConfigPatch {
            device: Some(SysDevice {
                name: Some("porch".into()),
            }),
            sntp: None,
        },
    };
    let result = client.call::<SysSetConfig>(&host, &params).await.unwrap();
    assert!(!result.restart_required);
}

#[tokio::test]
async fn test_script_list() {
    let (server, client, host) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rpc/Script.List"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "scripts": [{"id": 1, "name": "watchdog.js", "enable": true, "running": true}]
        })))
        .mount(&server)
        .await;

    let list = client.call::<ScriptList>(&host, &NoParams {}).await.unwrap();
    assert_eq!(list.scripts.len(), 1);
    assert!(list.scripts[0].running);
}

// ── Error mapping ───────────────────────────────────────────────────

#[tokio::test]
async fn test_device_error_body() {
    let (server, client, host) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rpc/KVS.Get"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": -105,
            "message": "Argument 'key', value 'script/watchdog.js' not found!"
        })))
        .mount(&server)
        .await;

    let result = client
        .call::<KvsGet>(
            &host,
            &KvsKey {
                key: "script/watchdog.js".into(),
            },
        )
        .await;
    assert!(
        matches!(result, Err(Error::Rpc { code: -105, .. })),
        "expected device error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_plain_http_error() {
    let (server, client, host) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rpc/Shelly.GetStatus"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let result = client.call_raw(&host, "Shelly.GetStatus", None).await;
    assert!(
        matches!(result, Err(Error::Http { status: 404, .. })),
        "expected HTTP error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let client = ShellyHttpClient::with_client(reqwest::Client::new());
    let err = client
        .call_raw("127.0.0.1:1", "Shelly.GetStatus", None)
        .await
        .unwrap_err();
    assert!(err.is_transient(), "expected transient error, got: {err:?}");
}
