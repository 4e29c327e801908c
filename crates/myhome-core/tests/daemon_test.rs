#![allow(clippy::unwrap_used)]
// End-to-end tests of the daemon over an in-process MQTT link: events
// come in on device topics, verbs go through `myhome/rpc`.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use myhome_api::LoopbackLink;
use myhome_core::{CoreError, Daemon, DaemonConfig, ErrorKind, RegistryEvent, RpcClient};

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    daemon: Daemon,
    link: Arc<LoopbackLink>,
    client: RpcClient,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = DaemonConfig {
        database: dir.path().join("myhome.db"),
        enable_mdns: false,
        refresh_interval: Duration::ZERO,
        ..DaemonConfig::default()
    };
    let link = LoopbackLink::new("myhome");
    let cancel = CancellationToken::new();
    let daemon = Daemon::start(config, link.clone(), &cancel).await.unwrap();
    let client = RpcClient::connect(link.clone(), Duration::from_secs(5), &cancel)
        .await
        .unwrap();
    Harness {
        daemon,
        link,
        client,
        _dir: dir,
    }
}

async fn next_upsert(events: &mut tokio::sync::broadcast::Receiver<RegistryEvent>) -> String {
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        RegistryEvent::Upserted(device) => device.id.clone(),
        RegistryEvent::Removed { id } => panic!("unexpected removal of {id}"),
    }
}

// ── Device lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn test_gen1_sensor_device_lifecycle_over_rpc() {
    let h = harness().await;
    let mut events = h.daemon.registry().subscribe();

    h.link
        .inject("shellies/shellyht-C45BBE6B1234/sensor/temperature", "21.5");
    assert_eq!(next_upsert(&mut events).await, "shellyht-c45bbe6b1234");

    let list = h.client.call("device.list", Value::Null).await.unwrap();
    let devices = list.as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["kind"], "Gen1");
    assert_eq!(devices[0]["status"]["sensor"]["temperature"], 21.5);

    h.client
        .call("room.create", json!({"id": "attic", "name": "Attic"}))
        .await
        .unwrap();
    let device = h
        .client
        .call(
            "device.set_room",
            json!({"device": "shellyht-c45bbe6b1234", "room": "attic"}),
        )
        .await
        .unwrap();
    assert_eq!(device["room_id"], "attic");

    let forgotten = h
        .client
        .call("device.forget", json!({"device": "shellyht-c45bbe6b1234"}))
        .await
        .unwrap();
    assert_eq!(forgotten["id"], "shellyht-c45bbe6b1234");
    let list = h.client.call("device.list", Value::Null).await.unwrap();
    assert_eq!(list, json!([]));

    h.daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_errors_keep_their_code_over_mqtt() {
    let h = harness().await;

    let err = h.client.call("device.rename", json!({})).await.unwrap_err();
    assert!(matches!(err, CoreError::Remote { code: -32601, .. }));
    assert_eq!(err.kind(), ErrorKind::Protocol);

    let err = h
        .client
        .call("device.show", json!({"device": "nothing-here"}))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Remote { code: -32004, .. }));
    assert_eq!(err.kind(), ErrorKind::State);

    let err = h.client.call("group.add", json!({"group": 3})).await.unwrap_err();
    assert!(matches!(err, CoreError::Remote { code: -32602, .. }));

    h.daemon.shutdown().await.unwrap();
}

// ── Message cache ───────────────────────────────────────────────────

#[tokio::test]
async fn test_cached_blu_message_is_replayed() {
    let h = harness().await;
    let topic = "shelly-blu/events/3c:2e:f5:71:d5:2a";
    h.link.inject(topic, r#"{"encryption":false,"BTHome_version":2,"pid":1}"#);

    let mut stats = json!(null);
    for _ in 0..50 {
        stats = h.client.call("mqtt.stats", Value::Null).await.unwrap();
        if stats["entries"] == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stats["entries"], 1);

    h.client
        .call("mqtt.repeat", json!({"topic": topic}))
        .await
        .unwrap();
    assert_eq!(h.link.published_on(topic).len(), 1);

    let err = h
        .client
        .call("mqtt.repeat", json!({"topic": "shelly-blu/events/never"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    h.daemon.shutdown().await.unwrap();
}

// ── Temperature scheduling ──────────────────────────────────────────

#[tokio::test]
async fn test_schedule_and_weekday_verbs() {
    let h = harness().await;

    let schedules = h
        .client
        .call(
            "temperature.schedule.set",
            json!({"kind": "workday", "ranges": [{"start": "06:00", "end": "08:30"}]}),
        )
        .await
        .unwrap();
    assert_eq!(schedules[0]["kind"], "workday");
    assert_eq!(schedules[0]["ranges"].as_array().unwrap().len(), 1);

    let defaults = h
        .client
        .call(
            "temperature.weekday.set",
            json!({"weekday": "Mon", "kind": "workday"}),
        )
        .await
        .unwrap();
    assert_eq!(defaults, json!([{"weekday": "Mon", "kind": "workday"}]));

    let fetched = h
        .client
        .call("temperature.weekday.get", Value::Null)
        .await
        .unwrap();
    assert_eq!(fetched, defaults);

    h.daemon.shutdown().await.unwrap();
}
