// ── Device updater ──
//
// Single consumer of the update channel. Events are folded into the
// registry one at a time; device refreshes run in parallel tasks under
// a semaphore and hand their results to one storage writer, so the
// registry sees every write through `modify`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use myhome_api::Notification;
use myhome_api::shelly::methods::{GetConfig, GetDeviceInfo, GetStatus, NoParams};
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::events::{DeviceUpdate, UpdateSender};
use crate::model::{BluEvent, BluInfo, Device, DeviceKind, MacAddress, blu_id};
use crate::occupancy::Occupancy;
use crate::recorder::Recorder;
use crate::router::Router;
use crate::setup::SetupRunner;
use crate::shelly::{DeviceConnector, DeviceRpc, call};
use crate::store::Registry;

/// Concurrent device refreshes.
pub const REFRESH_PERMITS: usize = 10;
const WRITE_QUEUE: usize = 64;

/// What one refresh read from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Refreshed {
    pub id: String,
    /// `None` when the stored info was kept.
    pub info: Option<Value>,
    pub config: Value,
    pub status: Value,
}

impl Refreshed {
    fn revision(&self) -> Option<u32> {
        [&self.config, &self.status]
            .into_iter()
            .find_map(|blob| blob["sys"]["cfg_rev"].as_u64())
            .and_then(|r| u32::try_from(r).ok())
    }

    /// Fold into a device record.
    pub fn apply_to(&self, device: &mut Device) {
        if let Some(info) = &self.info {
            if device.mac.is_none() {
                device.mac = info["mac"]
                    .as_str()
                    .and_then(|m| MacAddress::parse(m).ok());
            }
            device.info = info.clone();
        }
        if device.name.is_empty() {
            if let Some(name) = self.config["sys"]["device"]["name"].as_str() {
                name.clone_into(&mut device.name);
            }
        }
        if let Some(rev) = self.revision() {
            device.advance_revision(rev);
        }
        device.config = self.config.clone();
        device.replace_status(self.status.clone());
        device.touch();
    }
}

/// Read config and status from a device, and its info when `with_info`.
/// Info only changes with firmware, so periodic refreshes skip it.
pub async fn fetch(
    rpc: &(impl DeviceRpc + ?Sized),
    with_info: bool,
) -> Result<Refreshed, CoreError> {
    let info = if with_info {
        Some(call::<GetDeviceInfo>(rpc, &NoParams {}).await?)
    } else {
        None
    };
    let config = call::<GetConfig>(rpc, &NoParams {}).await?;
    let status = call::<GetStatus>(rpc, &NoParams {}).await?;
    Ok(Refreshed {
        id: rpc.device_id().to_owned(),
        info,
        config,
        status,
    })
}

pub async fn apply(registry: &Registry, refreshed: Refreshed) -> Result<Arc<Device>, CoreError> {
    let id = refreshed.id.clone();
    registry.modify(&id, move |d| refreshed.apply_to(d)).await
}

/// Refresh one device now and return the stored record.
pub async fn refresh_now(
    registry: &Registry,
    connector: &dyn DeviceConnector,
    id: &str,
) -> Result<Arc<Device>, CoreError> {
    let device = registry
        .get_by_id(id)
        .await?
        .ok_or_else(|| CoreError::not_found("device", id))?;
    if !device.kind.is_rpc_capable() {
        return Ok(device);
    }
    let rpc = connector.connect(&device).await?;
    apply(registry, fetch(&*rpc, true).await?).await
}

/// Apply a Gen2 notification. Returns `true` when the reported config
/// revision moved forward.
pub fn apply_notification(device: &mut Device, note: &Notification) -> bool {
    let params = &note.params;
    match note.method.as_str() {
        "NotifyFullStatus" => device.replace_status(params.clone()),
        "NotifyStatus" => device.merge_status(params),
        _ => {}
    }
    let mut revisions: Vec<u64> = params["sys"]["cfg_rev"].as_u64().into_iter().collect();
    if let Some(events) = params["events"].as_array() {
        for event in events {
            revisions.extend(event["cfg_rev"].as_u64());
            if event["restart_required"].as_bool() == Some(true) {
                info!(device = %device.id, component = %event["component"], "device requests a restart");
            }
        }
    }
    let mut stale = false;
    for rev in revisions {
        if let Ok(rev) = u32::try_from(rev) {
            stale |= device.advance_revision(rev);
        }
    }
    stale
}

fn is_input_event(note: &Notification) -> bool {
    note.method == "NotifyEvent"
        && note.params["events"].as_array().is_some_and(|events| {
            events.iter().any(|e| {
                e["component"]
                    .as_str()
                    .is_some_and(|c| c.starts_with("input"))
            })
        })
}

// ── Updater ─────────────────────────────────────────────────────────

pub struct Updater {
    registry: Arc<Registry>,
    connector: Arc<dyn DeviceConnector>,
    router: Router,
    setup: Option<Arc<SetupRunner>>,
    recorder: Option<Recorder>,
    occupancy: Option<Arc<Occupancy>>,
    permits: Arc<Semaphore>,
    writes: mpsc::Sender<Refreshed>,
    cancel: CancellationToken,
}

impl Updater {
    /// Start the fold consumer, the storage writer and, when
    /// `refresh_interval` is non-zero, the round-robin ticker.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        registry: Arc<Registry>,
        connector: Arc<dyn DeviceConnector>,
        router: Router,
        setup: Option<Arc<SetupRunner>>,
        recorder: Option<Recorder>,
        occupancy: Option<Arc<Occupancy>>,
        updates: (UpdateSender, mpsc::Receiver<DeviceUpdate>),
        refresh_interval: Duration,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let cancel = cancel.child_token();
        let (writes, write_rx) = mpsc::channel(WRITE_QUEUE);
        let (sender, rx) = updates;
        let updater = Arc::new(Self {
            registry: Arc::clone(&registry),
            connector,
            router,
            setup,
            recorder,
            occupancy,
            permits: Arc::new(Semaphore::new(REFRESH_PERMITS)),
            writes,
            cancel: cancel.clone(),
        });

        let mut handles = vec![
            tokio::spawn(storage_writer_task(registry, write_rx, cancel.clone())),
            tokio::spawn(fold_task(Arc::clone(&updater), rx)),
        ];
        if !refresh_interval.is_zero() {
            handles.push(tokio::spawn(ticker_task(
                Arc::clone(&updater.registry),
                sender,
                refresh_interval,
                cancel,
            )));
        }
        handles
    }

    async fn fold(self: &Arc<Self>, update: DeviceUpdate) -> Result<(), CoreError> {
        if let Some(recorder) = &self.recorder {
            record(recorder, &update).await;
        }
        match update {
            DeviceUpdate::Gen2(note) => self.fold_gen2(note).await,
            DeviceUpdate::Gen1Sensor { id, sensor, value } => {
                self.registry
                    .modify_or_create(
                        &id,
                        || Some(Device::shelly(id.clone(), DeviceKind::Gen1)),
                        |d| {
                            d.set_sensor(&sensor, value);
                            d.touch();
                        },
                    )
                    .await?;
                if sensor == "motion" && value > 0.0 {
                    self.observe(&id);
                }
                Ok(())
            }
            DeviceUpdate::Blu { mac, event } => self.fold_blu(mac, &event).await,
            DeviceUpdate::Discovered { id, ip } => {
                let existed = self.registry.get_by_id(&id).await?.is_some();
                let host = ip.to_string();
                let device = self
                    .registry
                    .modify_or_create(
                        &id,
                        || Some(Device::shelly(id.clone(), DeviceKind::Gen2)),
                        |d| {
                            d.host = host;
                            d.touch();
                        },
                    )
                    .await?;
                if !existed {
                    info!(device = %id, ip = %ip, "discovered new device");
                }
                self.follow_up(device, !existed, false).await
            }
            DeviceUpdate::Refresh { id } => {
                if let Some(device) = self.registry.get_by_id(&id).await? {
                    if device.kind.is_rpc_capable() {
                        self.spawn_refresh(device);
                    }
                }
                Ok(())
            }
        }
    }

    async fn fold_gen2(self: &Arc<Self>, note: Notification) -> Result<(), CoreError> {
        let id = crate::model::normalize_id(&note.src);
        let existed = self.registry.get_by_id(&id).await?.is_some();
        let mut stale = false;
        let device = self
            .registry
            .modify_or_create(
                &id,
                || Some(Device::shelly(id.clone(), DeviceKind::Gen2)),
                |d| {
                    stale = apply_notification(d, &note);
                    d.touch();
                },
            )
            .await?;
        if is_input_event(&note) {
            self.observe(&id);
        }
        if stale {
            debug!(device = %id, revision = device.config_revision, "config revision advanced");
        }
        self.follow_up(device, !existed, stale).await
    }

    async fn fold_blu(&self, mac: MacAddress, event: &BluEvent) -> Result<(), CoreError> {
        let id = blu_id(&mac);
        if event.is_activity() {
            self.observe(&id);
        }
        let existing = self.registry.get_by_id(&id).await?;
        let known = existing.as_ref().and_then(|d| BluInfo::from_value(&d.info));
        let merged = known.clone().unwrap_or_default().merged_with(event);
        let needs_write = match &existing {
            None => true,
            Some(d) => !d.has_info() || known.as_ref() != Some(&merged) || d.mac.is_none(),
        };
        if !needs_write {
            return Ok(());
        }
        let info = serde_json::to_value(&merged)?;
        self.registry
            .modify_or_create(
                &id,
                || Some(Device::shelly(id.clone(), DeviceKind::Blu)),
                |d| {
                    d.info = info;
                    d.mac = Some(mac);
                    d.touch();
                },
            )
            .await?;
        debug!(device = %id, capabilities = ?merged.capabilities, "BLU device updated");
        Ok(())
    }

    /// Gen2+ follow-ups: host drift from the ARP table, a refresh when the
    /// record is new or stale, auto-setup for new devices.
    async fn follow_up(
        self: &Arc<Self>,
        mut device: Arc<Device>,
        is_new: bool,
        stale: bool,
    ) -> Result<(), CoreError> {
        if !device.kind.is_rpc_capable() {
            return Ok(());
        }
        if let Some(mac) = device.mac.clone() {
            if let Some(ip) = self.router.lookup(&mac).await {
                let host = ip.to_string();
                if device.host != host {
                    info!(device = %device.id, from = %device.host, to = %host, "host changed");
                    device = self.registry.modify(&device.id, |d| d.host = host).await?;
                }
            }
        }
        if is_new || stale || !device.has_info() {
            self.spawn_refresh(Arc::clone(&device));
        }
        if let Some(setup) = self.setup.as_ref().filter(|_| is_new) {
            self.spawn_setup(Arc::clone(setup), device);
        }
        Ok(())
    }

    fn observe(&self, id: &str) {
        if let Some(occupancy) = &self.occupancy {
            occupancy.observe(id, Utc::now());
        }
    }

    fn spawn_refresh(self: &Arc<Self>, device: Arc<Device>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let cancel = this.cancel.clone();
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = this.refresh(&device) => {}
            }
        });
    }

    async fn refresh(&self, device: &Device) {
        let Ok(_permit) = self.permits.acquire().await else {
            return;
        };
        let result = match self.connector.connect(device).await {
            Ok(rpc) => fetch(&*rpc, !device.has_info()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(refreshed) => {
                if self.writes.send(refreshed).await.is_err() {
                    debug!(device = %device.id, "storage writer stopped");
                }
            }
            Err(e) => warn!(device = %device.id, error = %e, "refresh failed"),
        }
    }

    fn spawn_setup(&self, runner: Arc<SetupRunner>, device: Arc<Device>) {
        if runner.is_running(&device.id) {
            return;
        }
        let connector = Arc::clone(&self.connector);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let work = async {
                let rpc = connector.connect(&device).await?;
                runner.run_once(&*rpc, &device, false).await
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                result = work => match result {
                    Ok(Some(report)) => info!(device = %device.id, ?report, "auto-setup finished"),
                    Ok(None) => {}
                    Err(e) => warn!(device = %device.id, error = %e, "auto-setup failed"),
                },
            }
        });
    }
}

async fn record(recorder: &Recorder, update: &DeviceUpdate) {
    let (kind, event) = match update {
        DeviceUpdate::Gen2(note) => ("gen2", serde_json::to_value(note).unwrap_or_default()),
        DeviceUpdate::Gen1Sensor { sensor, value, .. } => {
            ("gen1", json!({ "sensor": sensor, "value": value }))
        }
        DeviceUpdate::Blu { event, .. } => ("blu", serde_json::to_value(event).unwrap_or_default()),
        DeviceUpdate::Discovered { ip, .. } => ("mdns", json!({ "ip": ip.to_string() })),
        DeviceUpdate::Refresh { .. } => return,
    };
    recorder.record(&update.device_id(), kind, event).await;
}

// ── Background tasks ────────────────────────────────────────────────

async fn fold_task(updater: Arc<Updater>, mut rx: mpsc::Receiver<DeviceUpdate>) {
    let cancel = updater.cancel.clone();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            update = rx.recv() => {
                let Some(update) = update else { break };
                let id = update.device_id();
                if let Err(e) = updater.fold(update).await {
                    warn!(device = %id, error = %e, "update not applied");
                }
            }
        }
    }
    debug!("updater stopped");
}

async fn storage_writer_task(
    registry: Arc<Registry>,
    mut rx: mpsc::Receiver<Refreshed>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            refreshed = rx.recv() => {
                let Some(refreshed) = refreshed else { break };
                let id = refreshed.id.clone();
                if let Err(e) = apply(&registry, refreshed).await {
                    warn!(device = %id, error = %e, "refresh not stored");
                }
            }
        }
    }
}

/// Push one Gen2+ device per tick, cycling through the fleet.
async fn ticker_task(
    registry: Arc<Registry>,
    updates: UpdateSender,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick
    let mut cursor = 0usize;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let ids: Vec<String> = registry
                    .get_all()
                    .into_iter()
                    .filter(|d| d.kind.is_rpc_capable())
                    .map(|d| d.id.clone())
                    .collect();
                if ids.is_empty() {
                    continue;
                }
                let id = ids[cursor % ids.len()].clone();
                cursor = cursor.wrapping_add(1);
                debug!(device = %id, "scheduled refresh");
                updates.offer(DeviceUpdate::Refresh { id });
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::Store;
    use crate::testing::FakeDevice;

    fn note(src: &str, method: &str, params: Value) -> Notification {
        Notification {
            src: src.into(),
            dst: "myhome".into(),
            method: method.into(),
            params,
        }
    }

    #[test]
    fn notifications_fold_into_status() {
        let mut d = Device::shelly("shellyplus1-a", DeviceKind::Gen2);
        let full = note(
            "shellyplus1-a",
            "NotifyFullStatus",
            json!({"switch:0": {"output": false}, "sys": {"cfg_rev": 3}}),
        );
        assert!(apply_notification(&mut d, &full));
        assert_eq!(d.config_revision, 3);

        let partial = note("shellyplus1-a", "NotifyStatus", json!({"switch:0": {"output": true}}));
        assert!(!apply_notification(&mut d, &partial));
        assert_eq!(d.status["switch:0"]["output"], true);
        assert_eq!(d.status["sys"]["cfg_rev"], 3);

        let older = note(
            "shellyplus1-a",
            "NotifyEvent",
            json!({"events": [{"component": "sys", "event": "config_changed", "cfg_rev": 2}]}),
        );
        assert!(!apply_notification(&mut d, &older));
        assert_eq!(d.config_revision, 3);

        let newer = note(
            "shellyplus1-a",
            "NotifyEvent",
            json!({"events": [{"component": "sys", "event": "config_changed", "cfg_rev": 4, "restart_required": false}]}),
        );
        assert!(apply_notification(&mut d, &newer));
        assert_eq!(d.config_revision, 4);
        assert!(!is_input_event(&newer));
        assert!(is_input_event(&note(
            "shellyplus1-a",
            "NotifyEvent",
            json!({"events": [{"component": "input:0", "event": "single_push"}]})
        )));
    }

    #[test]
    fn refresh_keeps_user_name_and_fills_mac() {
        let mut d = Device::shelly("shellyplus1-a", DeviceKind::Gen2);
        d.name = "Hall".into();
        let refreshed = Refreshed {
            id: d.id.clone(),
            info: Some(json!({"id": "shellyplus1-a", "mac": "AABBCCDDEEFF"})),
            config: json!({"sys": {"cfg_rev": 9, "device": {"name": "Other"}}}),
            status: json!({"sys": {"cfg_rev": 9}}),
        };
        refreshed.apply_to(&mut d);
        assert_eq!(d.name, "Hall");
        assert_eq!(d.mac.as_ref().unwrap().as_str(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(d.config_revision, 9);
        assert!(d.has_info());
    }

    struct FakeConnector(Arc<FakeDevice>);

    #[async_trait]
    impl DeviceConnector for FakeConnector {
        async fn connect(&self, _device: &Device) -> Result<Arc<dyn DeviceRpc>, CoreError> {
            let rpc: Arc<dyn DeviceRpc> = self.0.clone();
            Ok(rpc)
        }
    }

    async fn updater(dev: Arc<FakeDevice>) -> (Arc<Updater>, Arc<Registry>, mpsc::Receiver<Refreshed>) {
        let registry = Arc::new(
            Registry::open(Arc::new(Store::open_in_memory().unwrap()))
                .await
                .unwrap(),
        );
        let (writes, write_rx) = mpsc::channel(8);
        let updater = Arc::new(Updater {
            registry: Arc::clone(&registry),
            connector: Arc::new(FakeConnector(dev)),
            router: Router::with_arp_table("/nonexistent/arp"),
            setup: None,
            recorder: None,
            occupancy: Some(Arc::new(Occupancy::new())),
            permits: Arc::new(Semaphore::new(REFRESH_PERMITS)),
            writes,
            cancel: CancellationToken::new(),
        });
        (updater, registry, write_rx)
    }

    #[tokio::test]
    async fn discovery_creates_and_refreshes() {
        let dev = FakeDevice::new("shelly1minig3-54320464a1d0");
        let (updater, registry, mut writes) = updater(dev).await;
        updater
            .fold(DeviceUpdate::Discovered {
                id: "shelly1minig3-54320464a1d0".into(),
                ip: Ipv4Addr::new(192, 168, 1, 76),
            })
            .await
            .unwrap();

        let stored = registry
            .get_by_id("shelly1minig3-54320464a1d0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.host, "192.168.1.76");
        assert_eq!(stored.kind, DeviceKind::Gen2);

        let refreshed = writes.recv().await.unwrap();
        let stored = apply(&registry, refreshed).await.unwrap();
        assert!(stored.has_info());
        assert_eq!(stored.config_revision, 7);
        assert_eq!(stored.host, "192.168.1.76");
    }

    #[tokio::test]
    async fn full_status_for_unknown_device_registers_it() {
        let (updater, registry, _writes) = updater(FakeDevice::new("shellyplus1-b")).await;
        updater
            .fold(DeviceUpdate::Gen2(note(
                "shellyplus1-b",
                "NotifyFullStatus",
                json!({"switch:0": {"output": true}}),
            )))
            .await
            .unwrap();
        let d = registry.get_by_id("shellyplus1-b").await.unwrap().unwrap();
        assert_eq!(d.status["switch:0"]["output"], true);
    }

    #[tokio::test]
    async fn gen1_readings_accumulate() {
        let (updater, registry, _writes) = updater(FakeDevice::new("unused")).await;
        for (sensor, value) in [("temperature", 21.5), ("humidity", 40.0), ("motion", 1.0)] {
            updater
                .fold(DeviceUpdate::Gen1Sensor {
                    id: "shellyht-aabbcc".into(),
                    sensor: sensor.into(),
                    value,
                })
                .await
                .unwrap();
        }
        let d = registry.get_by_id("shellyht-aabbcc").await.unwrap().unwrap();
        assert_eq!(d.kind, DeviceKind::Gen1);
        assert_eq!(d.status["sensor"]["temperature"], 21.5);
        assert_eq!(d.status["sensor"]["humidity"], 40.0);
        assert!(updater.occupancy.as_ref().unwrap().status().occupied);
    }

    #[tokio::test]
    async fn blu_capabilities_grow_with_one_write_per_change() {
        let (updater, registry, _writes) = updater(FakeDevice::new("unused")).await;
        let mut changes = registry.subscribe();
        let mac = MacAddress::parse("AA:BB:CC:DD:EE:FF").unwrap();
        let frame = |v: Value| DeviceUpdate::Blu {
            mac: mac.clone(),
            event: serde_json::from_value(v).unwrap(),
        };

        updater
            .fold(frame(json!({"BTHome_version": 2, "temperature": 21.0})))
            .await
            .unwrap();
        let d = registry.get_by_id("shellyblu-aabbccddeeff").await.unwrap().unwrap();
        assert_eq!(d.info["capabilities"], json!(["temperature"]));
        assert!(changes.try_recv().is_ok());

        updater
            .fold(frame(json!({"BTHome_version": 2, "temperature": 21.5, "humidity": 42})))
            .await
            .unwrap();
        let d = registry.get_by_id("shellyblu-aabbccddeeff").await.unwrap().unwrap();
        assert_eq!(d.info["capabilities"], json!(["temperature", "humidity"]));
        assert!(changes.try_recv().is_ok());
        assert!(changes.try_recv().is_err());

        // Same capabilities again: nothing is written.
        updater
            .fold(frame(json!({"BTHome_version": 2, "humidity": 43})))
            .await
            .unwrap();
        assert!(changes.try_recv().is_err());

        // A frame without the header keeps the stored version.
        updater
            .fold(frame(json!({"temperature": 22.0})))
            .await
            .unwrap();
        assert!(changes.try_recv().is_err());
        let d = registry.get_by_id("shellyblu-aabbccddeeff").await.unwrap().unwrap();
        assert_eq!(d.info["version"], 2);
    }

    #[tokio::test]
    async fn scheduled_refreshes_read_info_once() {
        let dev = FakeDevice::new("shellyplus1-a");
        let (updater, registry, mut writes) = updater(Arc::clone(&dev)).await;
        registry
            .upsert(Device::shelly("shellyplus1-a", DeviceKind::Gen2), false)
            .await
            .unwrap();

        for _ in 0..2 {
            updater
                .fold(DeviceUpdate::Refresh {
                    id: "shellyplus1-a".into(),
                })
                .await
                .unwrap();
            let refreshed = writes.recv().await.unwrap();
            apply(&registry, refreshed).await.unwrap();
        }

        let info_reads = dev
            .methods()
            .iter()
            .filter(|m| *m == "Shelly.GetDeviceInfo")
            .count();
        assert_eq!(info_reads, 1);
        assert_eq!(
            dev.methods()
                .iter()
                .filter(|m| *m == "Shelly.GetStatus")
                .count(),
            2
        );
        let stored = registry.get_by_id("shellyplus1-a").await.unwrap().unwrap();
        assert!(stored.has_info());

        // An explicit refresh reads it again.
        let connector = FakeConnector(Arc::clone(&dev));
        refresh_now(&registry, &connector, "shellyplus1-a").await.unwrap();
        let info_reads = dev
            .methods()
            .iter()
            .filter(|m| *m == "Shelly.GetDeviceInfo")
            .count();
        assert_eq!(info_reads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_cycles_through_gen2_devices() {
        let registry = Arc::new(
            Registry::open(Arc::new(Store::open_in_memory().unwrap()))
                .await
                .unwrap(),
        );
        for id in ["shellyplus1-a", "shellyplus1-b"] {
            registry
                .upsert(Device::shelly(id, DeviceKind::Gen2), false)
                .await
                .unwrap();
        }
        registry
            .upsert(Device::shelly("shellyht-c", DeviceKind::Gen1), false)
            .await
            .unwrap();

        let (sender, mut rx) = UpdateSender::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(ticker_task(
            registry,
            sender,
            Duration::from_secs(60),
            cancel.clone(),
        ));
        let mut seen = Vec::new();
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                DeviceUpdate::Refresh { id } => seen.push(id),
                other => panic!("unexpected update {other:?}"),
            }
        }
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(seen, vec!["shellyplus1-a", "shellyplus1-b", "shellyplus1-a"]);
    }
}
