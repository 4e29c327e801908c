// ── Daemon facade ──
//
// Wires the store, MQTT link, proxies, producers, updater and RPC
// surfaces together under one cancellation tree. Verb handlers hold
// `Arc<Services>`; the broker is built from them and held beside them,
// never inside.

use std::net::Ipv4Addr;
use std::sync::{Arc, OnceLock};

use myhome_api::mdns::MdnsResolver;
use myhome_api::mqtt::watchdog;
use myhome_api::{MqttClient, MqttLink, MqttOptions, ShellyHttpClient, TransportConfig};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::DaemonConfig;
use crate::error::CoreError;
use crate::events::{UpdateSender, blu, gen1, gen2, mdns};
use crate::model::{Device, Group, KindSchedule, Room, TemperatureConfig, WeekdayDefault};
use crate::mqtt_cache::{CacheStats, MessageCache};
use crate::occupancy::{Occupancy, OccupancyStatus};
use crate::recorder::Recorder;
use crate::router::{Router, device_broker, local_ipv4};
use crate::rpc::params::{
    DeviceCall, DeviceRef, DeviceToken, GroupId, GroupMember, NewGroup, RoomId, ScriptDeleted,
    ScriptRef, ScriptUpload, SetRoom, Topic,
};
use crate::rpc::{Broker, Empty, MethodInfo, serve};
use crate::script::{UploadOutcome, delete_with_version, upload_with_version};
use crate::setup::{SetupReport, SetupRunner, detached, within};
use crate::shelly::{DeviceConnector, DeviceRpc, ProxyOptions, ProxyPool};
use crate::store::{Registry, Store};
use crate::updater::{Updater, refresh_now};

/// MQTT client id of the daemon.
pub const DAEMON_CLIENT_ID: &str = "myhome";

// ── Services ─────────────────────────────────────────────────────────

/// Everything a verb handler may touch.
pub struct Services {
    config: DaemonConfig,
    registry: Arc<Registry>,
    link: Arc<dyn MqttLink>,
    pool: Arc<ProxyPool>,
    cache: Arc<MessageCache>,
    resolver: MdnsResolver,
    occupancy: Option<Arc<Occupancy>>,
    setup: Arc<SetupRunner>,
    /// Parent of work that outlives the request asking for it.
    cancel: CancellationToken,
    methods: OnceLock<Vec<MethodInfo>>,
}

impl Services {
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn link(&self) -> &Arc<dyn MqttLink> {
        &self.link
    }

    pub fn resolver(&self) -> &MdnsResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    /// Best known IPv4 for a device: its host, else an mDNS answer.
    pub async fn address_of(&self, device: &Device) -> Option<Ipv4Addr> {
        if let Ok(ip) = device.host.parse() {
            return Some(ip);
        }
        if let Some(ip) = self.resolver.lookup(&device.id) {
            return Some(ip);
        }
        if !self.config.enable_mdns {
            return None;
        }
        match self
            .resolver
            .resolve(&device.id, self.config.mdns_timeout)
            .await
        {
            Ok(ip) => Some(ip),
            Err(e) => {
                debug!(device = %device.id, error = %e, "no mDNS answer");
                None
            }
        }
    }

    async fn rpc_for(&self, token: &str) -> Result<(Arc<Device>, Arc<dyn DeviceRpc>), CoreError> {
        let device = self.registry.get_by_any(token).await?;
        if !device.kind.is_rpc_capable() {
            return Err(CoreError::MethodNotSupported {
                device: device.id.clone(),
                method: "rpc".into(),
            });
        }
        let rpc = self.pool.connect(&device).await?;
        Ok((device, rpc))
    }

    // ── device.* ──

    async fn device_list(self: Arc<Self>, _: Empty) -> Result<Vec<Arc<Device>>, CoreError> {
        Ok(self.registry.get_all())
    }

    async fn device_show(self: Arc<Self>, p: DeviceToken) -> Result<Arc<Device>, CoreError> {
        self.registry.get_by_any(&p.device).await
    }

    async fn device_lookup(self: Arc<Self>, p: DeviceToken) -> Result<DeviceRef, CoreError> {
        let device = self.registry.get_by_any(&p.device).await?;
        let ip = self.address_of(&device).await;
        Ok(DeviceRef::of(&device, ip))
    }

    async fn device_forget(self: Arc<Self>, p: DeviceToken) -> Result<DeviceRef, CoreError> {
        let device = self.registry.get_by_any(&p.device).await?;
        let removed = self.registry.delete(&device.id).await?;
        self.pool.remove(&removed.id);
        info!(device = %removed.id, "device forgotten");
        Ok(DeviceRef::of(&removed, None))
    }

    async fn device_setup(self: Arc<Self>, p: DeviceToken) -> Result<SetupReport, CoreError> {
        let (device, rpc) = self.rpc_for(&p.device).await?;
        let runner = Arc::clone(&self.setup);
        detached(&self.cancel, async move {
            runner
                .run_once(&*rpc, &device, true)
                .await?
                .ok_or_else(|| CoreError::Busy {
                    what: format!("setup of {}", device.id),
                })
        })
        .await
    }

    async fn device_refresh(self: Arc<Self>, p: DeviceToken) -> Result<Arc<Device>, CoreError> {
        let device = self.registry.get_by_any(&p.device).await?;
        refresh_now(&self.registry, self.pool.as_ref(), &device.id).await
    }

    async fn device_call(self: Arc<Self>, p: DeviceCall) -> Result<Value, CoreError> {
        let (_, rpc) = self.rpc_for(&p.device).await?;
        rpc.call_raw(p.channel, &p.method, p.params).await
    }

    async fn device_set_room(self: Arc<Self>, p: SetRoom) -> Result<Arc<Device>, CoreError> {
        self.registry.set_room(&p.device, p.room).await
    }

    // ── script.* ──

    async fn script_upload(self: Arc<Self>, p: ScriptUpload) -> Result<UploadOutcome, CoreError> {
        let (_, rpc) = self.rpc_for(&p.device).await?;
        let budget = self.config.setup.script_budget;
        detached(&self.cancel, async move {
            within(
                "script upload",
                budget,
                upload_with_version(&*rpc, &p.name, &p.code, p.force),
            )
            .await
        })
        .await
    }

    async fn script_delete(self: Arc<Self>, p: ScriptRef) -> Result<ScriptDeleted, CoreError> {
        let (_, rpc) = self.rpc_for(&p.device).await?;
        let id = delete_with_version(&*rpc, &p.name).await?;
        Ok(ScriptDeleted { id })
    }

    // ── mqtt.* ──

    async fn mqtt_repeat(self: Arc<Self>, p: Topic) -> Result<(), CoreError> {
        self.cache.replay(self.link.as_ref(), &p.topic).await
    }

    async fn mqtt_stats(self: Arc<Self>, _: Empty) -> Result<CacheStats, CoreError> {
        Ok(self.cache.stats())
    }

    // ── group.* ──

    async fn group_list(self: Arc<Self>, _: Empty) -> Result<Vec<Group>, CoreError> {
        self.registry.list_groups().await
    }

    async fn group_show(self: Arc<Self>, p: GroupId) -> Result<Group, CoreError> {
        self.registry.get_group(&p.group).await
    }

    async fn group_create(self: Arc<Self>, p: NewGroup) -> Result<Group, CoreError> {
        self.registry.create_group(&p.id, &p.name).await?;
        self.registry.get_group(&p.id).await
    }

    async fn group_delete(self: Arc<Self>, p: GroupId) -> Result<(), CoreError> {
        self.registry.delete_group(&p.group).await
    }

    async fn group_add(self: Arc<Self>, p: GroupMember) -> Result<Group, CoreError> {
        self.registry.add_to_group(&p.group, &p.device).await?;
        self.registry.get_group(&p.group).await
    }

    async fn group_remove(self: Arc<Self>, p: GroupMember) -> Result<Group, CoreError> {
        self.registry.remove_from_group(&p.group, &p.device).await?;
        self.registry.get_group(&p.group).await
    }

    // ── room.* ──

    async fn room_list(self: Arc<Self>, _: Empty) -> Result<Vec<Room>, CoreError> {
        self.registry.list_rooms().await
    }

    async fn room_create(self: Arc<Self>, room: Room) -> Result<Room, CoreError> {
        self.registry.create_room(room.clone()).await?;
        Ok(room)
    }

    async fn room_delete(self: Arc<Self>, p: RoomId) -> Result<(), CoreError> {
        self.registry.delete_room(&p.room).await
    }

    // ── temperature.* ──

    async fn temperature_list(
        self: Arc<Self>,
        _: Empty,
    ) -> Result<Vec<TemperatureConfig>, CoreError> {
        self.registry.list_temperature().await
    }

    async fn temperature_get(self: Arc<Self>, p: RoomId) -> Result<TemperatureConfig, CoreError> {
        self.registry.get_temperature(&p.room).await
    }

    async fn temperature_set(
        self: Arc<Self>,
        cfg: TemperatureConfig,
    ) -> Result<TemperatureConfig, CoreError> {
        self.registry.set_temperature(cfg.clone()).await?;
        Ok(cfg)
    }

    async fn temperature_delete(self: Arc<Self>, p: RoomId) -> Result<(), CoreError> {
        self.registry.delete_temperature(&p.room).await
    }

    async fn schedule_get(self: Arc<Self>, _: Empty) -> Result<Vec<KindSchedule>, CoreError> {
        self.registry.kind_schedules().await
    }

    async fn schedule_set(
        self: Arc<Self>,
        schedule: KindSchedule,
    ) -> Result<Vec<KindSchedule>, CoreError> {
        self.registry.set_kind_schedule(schedule).await?;
        self.registry.kind_schedules().await
    }

    async fn weekday_get(self: Arc<Self>, _: Empty) -> Result<Vec<WeekdayDefault>, CoreError> {
        self.registry.weekday_defaults().await
    }

    async fn weekday_set(
        self: Arc<Self>,
        default: WeekdayDefault,
    ) -> Result<Vec<WeekdayDefault>, CoreError> {
        self.registry.set_weekday_default(default).await?;
        self.registry.weekday_defaults().await
    }

    // ── occupancy / server ──

    async fn occupancy_status(self: Arc<Self>, _: Empty) -> Result<OccupancyStatus, CoreError> {
        self.occupancy
            .as_ref()
            .map(|o| o.status())
            .ok_or_else(|| CoreError::MethodNotFound {
                method: "occupancy.status".into(),
            })
    }

    async fn server_methods(self: Arc<Self>, _: Empty) -> Result<Vec<MethodInfo>, CoreError> {
        Ok(self.methods.get().cloned().unwrap_or_default())
    }
}

/// Adapt a `Services` method into a broker handler.
fn bind<P, R, F, Fut>(svc: &Arc<Services>, f: F) -> impl Fn(P) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<Services>, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, CoreError>> + Send + 'static,
{
    let svc = Arc::clone(svc);
    move |p| f(Arc::clone(&svc), p)
}

/// The daemon's verb table.
pub fn build_broker(svc: &Arc<Services>) -> Result<Broker, CoreError> {
    let mut builder = Broker::builder()
        .register("device.list", bind(svc, Services::device_list))
        .register("device.show", bind(svc, Services::device_show))
        .register("device.lookup", bind(svc, Services::device_lookup))
        .register("device.forget", bind(svc, Services::device_forget))
        .register("device.setup", bind(svc, Services::device_setup))
        .register("device.refresh", bind(svc, Services::device_refresh))
        .register("device.call", bind(svc, Services::device_call))
        .register("device.set_room", bind(svc, Services::device_set_room))
        .register("script.upload", bind(svc, Services::script_upload))
        .register("script.delete", bind(svc, Services::script_delete))
        .register("mqtt.repeat", bind(svc, Services::mqtt_repeat))
        .register("mqtt.stats", bind(svc, Services::mqtt_stats))
        .register("group.list", bind(svc, Services::group_list))
        .register("group.show", bind(svc, Services::group_show))
        .register("group.create", bind(svc, Services::group_create))
        .register("group.delete", bind(svc, Services::group_delete))
        .register("group.add", bind(svc, Services::group_add))
        .register("group.remove", bind(svc, Services::group_remove))
        .register("room.list", bind(svc, Services::room_list))
        .register("room.create", bind(svc, Services::room_create))
        .register("room.delete", bind(svc, Services::room_delete))
        .register("temperature.list", bind(svc, Services::temperature_list))
        .register("temperature.get", bind(svc, Services::temperature_get))
        .register("temperature.set", bind(svc, Services::temperature_set))
        .register("temperature.delete", bind(svc, Services::temperature_delete))
        .register("temperature.schedule.get", bind(svc, Services::schedule_get))
        .register("temperature.schedule.set", bind(svc, Services::schedule_set))
        .register("temperature.weekday.get", bind(svc, Services::weekday_get))
        .register("temperature.weekday.set", bind(svc, Services::weekday_set))
        .register("server.methods", bind(svc, Services::server_methods));
    if svc.occupancy.is_some() {
        builder = builder.register("occupancy.status", bind(svc, Services::occupancy_status));
    }
    let broker = builder.build()?;
    let _ = svc.methods.set(broker.methods());
    Ok(broker)
}

// ── Daemon ───────────────────────────────────────────────────────────

/// A running daemon. Dropping it does not stop the tasks; call
/// [`shutdown`](Self::shutdown) or cancel the token passed to `start`.
pub struct Daemon {
    services: Arc<Services>,
    broker: Arc<Broker>,
    handles: Vec<JoinHandle<()>>,
    fatal: Arc<Mutex<Option<CoreError>>>,
    cancel: CancellationToken,
}

impl Daemon {
    /// Connect to the configured broker and start.
    pub async fn connect(config: DaemonConfig, cancel: &CancellationToken) -> Result<Self, CoreError> {
        let mut opts = MqttOptions::new(&config.mqtt_broker, DAEMON_CLIENT_ID);
        opts.username.clone_from(&config.mqtt_username);
        opts.password.clone_from(&config.mqtt_password);
        let link: Arc<dyn MqttLink> = MqttClient::start(&opts, cancel.child_token());
        Self::start(config, link, cancel).await
    }

    /// Start every subsystem on an existing link.
    #[allow(clippy::too_many_lines)]
    pub async fn start(
        config: DaemonConfig,
        link: Arc<dyn MqttLink>,
        cancel: &CancellationToken,
    ) -> Result<Self, CoreError> {
        let cancel = cancel.child_token();

        let store = Store::open(&config.database)?;
        let registry = Arc::new(Registry::open(Arc::new(store)).await?);
        info!(
            database = %config.database.display(),
            devices = registry.get_all().len(),
            "registry loaded"
        );

        let http = ShellyHttpClient::new(&TransportConfig {
            timeout: config.mqtt_timeout,
            ..TransportConfig::default()
        })?;
        let pool = Arc::new(ProxyPool::new(
            http,
            Arc::clone(&link),
            ProxyOptions {
                timeout: config.mqtt_timeout,
                grace: config.mqtt_grace,
                ..ProxyOptions::default()
            },
            &cancel,
        ));

        let mut handles = Vec::new();
        let cache = Arc::new(MessageCache::new(config.cache_budget_bytes));
        handles.push(
            Arc::clone(&cache)
                .spawn(Arc::clone(&link), &config.cache_topic, cancel.child_token())
                .await?,
        );

        let broker_address = config
            .device_broker
            .clone()
            .unwrap_or_else(|| device_broker(&config.mqtt_broker, local_ipv4()));
        let setup = Arc::new(SetupRunner::new(
            broker_address,
            config.mqtt_username.clone(),
            config.mqtt_password.clone(),
            config.sntp_server.clone(),
            config.setup.clone(),
        ));
        let occupancy = config
            .enable_occupancy_service
            .enabled()
            .then(|| Arc::new(Occupancy::new()));
        let recorder = match &config.events_dir {
            Some(dir) => Some(Recorder::open(dir).await?),
            None => None,
        };

        let (updates, update_rx) = UpdateSender::channel();
        let services = Arc::new(Services {
            config,
            registry: Arc::clone(&registry),
            link: Arc::clone(&link),
            pool: Arc::clone(&pool),
            cache,
            resolver: MdnsResolver::new(),
            occupancy: occupancy.clone(),
            setup: Arc::clone(&setup),
            cancel: cancel.child_token(),
            methods: OnceLock::new(),
        });
        let config = &services.config;

        let broker = Arc::new(build_broker(&services)?);
        handles.push(serve(Arc::clone(&link), Arc::clone(&broker), cancel.child_token()).await?);

        handles.push(gen2::spawn(&link, updates.clone(), cancel.child_token()).await?);
        handles.push(gen1::spawn(&link, updates.clone(), cancel.child_token()).await?);
        handles.push(blu::spawn(&link, updates.clone(), cancel.child_token()).await?);
        if config.enable_mdns {
            handles.push(mdns::spawn(
                services.resolver.clone(),
                updates.clone(),
                cancel.child_token(),
            )?);
        }

        let connector: Arc<dyn DeviceConnector> = pool;
        handles.extend(Updater::start(
            registry,
            connector,
            Router::default(),
            config.auto_setup.then_some(setup),
            recorder,
            occupancy,
            (updates, update_rx),
            config.refresh_interval,
            &cancel,
        ));

        let fatal = Arc::new(Mutex::new(None));
        handles.push(tokio::spawn(watchdog_task(
            Arc::clone(&link),
            config.clone(),
            Arc::clone(&fatal),
            cancel.clone(),
        )));

        info!(
            client_id = link.client_id(),
            verbs = broker.methods().len(),
            auto_setup = config.auto_setup,
            "daemon started"
        );
        Ok(Self {
            services,
            broker,
            handles,
            fatal,
            cancel,
        })
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.services.registry
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run until cancelled. Returns the fatal error that stopped the
    /// daemon, if any.
    pub async fn wait(self) -> Result<(), CoreError> {
        self.cancel.cancelled().await;
        self.join().await
    }

    pub async fn shutdown(self) -> Result<(), CoreError> {
        self.cancel.cancel();
        self.join().await
    }

    async fn join(self) -> Result<(), CoreError> {
        for handle in self.handles {
            let _ = handle.await;
        }
        if let Err(e) = self.services.registry.flush().await {
            error!(error = %e, "final registry flush failed");
        }
        self.fatal.lock().take().map_or(Ok(()), Err)
    }
}

async fn watchdog_task(
    link: Arc<dyn MqttLink>,
    config: DaemonConfig,
    fatal: Arc<Mutex<Option<CoreError>>>,
    cancel: CancellationToken,
) {
    let outcome = watchdog(
        link,
        config.mqtt_watchdog_interval,
        config.mqtt_watchdog_max_failures,
        cancel.clone(),
    )
    .await;
    if let Err(e) = outcome {
        error!(error = %e, "stopping daemon");
        *fatal.lock() = Some(e.into());
        cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use myhome_api::LoopbackLink;
    use serde_json::json;

    use super::*;
    use crate::config::Toggle;

    fn config(dir: &tempfile::TempDir) -> DaemonConfig {
        DaemonConfig {
            database: dir.path().join("myhome.db"),
            enable_mdns: false,
            refresh_interval: Duration::ZERO,
            ..DaemonConfig::default()
        }
    }

    async fn daemon(cfg: DaemonConfig) -> (Daemon, Arc<LoopbackLink>) {
        let link = LoopbackLink::new(DAEMON_CLIENT_ID);
        let cancel = CancellationToken::new();
        let daemon = Daemon::start(cfg, link.clone(), &cancel).await.unwrap();
        (daemon, link)
    }

    #[tokio::test]
    async fn registers_every_verb() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _) = daemon(config(&dir)).await;
        let names: Vec<String> = daemon
            .broker()
            .methods()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names.len(), 31);
        assert!(names.contains(&"occupancy.status".to_owned()));
        assert!(names.contains(&"temperature.weekday.set".to_owned()));

        let listed = daemon
            .broker()
            .call("server.methods", Value::Null)
            .await
            .unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 31);
        daemon.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn occupancy_verb_follows_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DaemonConfig {
            enable_occupancy_service: Toggle::Off,
            ..config(&dir)
        };
        let (daemon, _) = daemon(cfg).await;
        assert!(!daemon.broker().contains("occupancy.status"));
        daemon.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn home_verbs_round_trip_through_the_broker() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _) = daemon(config(&dir)).await;
        let broker = daemon.broker();

        broker
            .call("room.create", json!({"id": "kitchen", "name": "Kitchen"}))
            .await
            .unwrap();
        let rooms = broker.call("room.list", Value::Null).await.unwrap();
        assert_eq!(rooms, json!([{"id": "kitchen", "name": "Kitchen"}]));

        let group = broker
            .call("group.create", json!({"id": "lights", "name": "Lights"}))
            .await
            .unwrap();
        assert_eq!(group["id"], "lights");

        let err = broker
            .call("group.show", json!({"group": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);

        let err = broker
            .call("device.show", json!({"device": "shellyplus1-missing"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        daemon.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn gen2_notification_registers_device() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, link) = daemon(config(&dir)).await;
        let mut events = daemon.registry().subscribe();

        // Subscriptions are live once start returned.
        link.inject(
            "shellyplus1-a8032ab12345/events/rpc",
            json!({
                "src": "shellyplus1-a8032ab12345",
                "dst": "shellyplus1-a8032ab12345/events",
                "method": "NotifyStatus",
                "params": {"ts": 1.0, "switch:0": {"output": true}}
            })
            .to_string(),
        );
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.name(), "device.upserted");

        let shown = daemon
            .broker()
            .call("device.show", json!({"device": "shellyplus1-a8032ab12345"}))
            .await
            .unwrap();
        assert_eq!(shown["status"]["switch:0"]["output"], true);
        daemon.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lost_broker_stops_the_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DaemonConfig {
            mqtt_watchdog_interval: Duration::from_secs(1),
            ..config(&dir)
        };
        let (daemon, link) = daemon(cfg).await;
        link.set_connected(false);
        let err = daemon.wait().await.unwrap_err();
        assert!(matches!(err, CoreError::MqttUnrecoverable { failures: 3 }));
    }
}
