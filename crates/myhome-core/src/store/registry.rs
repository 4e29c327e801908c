// ── Multi-index device registry ──
//
// Write-through cache over `Store`. One mutex guards the id map and the
// three secondary indexes; store I/O always happens outside it on the
// blocking pool. Writers are serialized by an async gate so the
// duplicate check and the store write see the same state.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::Store;
use crate::error::CoreError;
use crate::model::{
    Device, Group, KindSchedule, MacAddress, Room, TemperatureConfig, WeekdayDefault, normalize_id,
};

/// Change notifications for SSE and other observers.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Upserted(Arc<Device>),
    Removed { id: String },
}

impl RegistryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upserted(_) => "device.upserted",
            Self::Removed { .. } => "device.removed",
        }
    }
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, Arc<Device>>,
    by_mac: HashMap<MacAddress, String>,
    by_host: HashMap<String, String>,
    by_name: HashMap<String, String>,
}

impl Indexes {
    /// First non-empty key of `device` already indexed under another id.
    fn conflict(&self, device: &Device) -> Option<(String, String)> {
        let other = |owner: Option<&String>| owner.filter(|o| **o != device.id).cloned();
        if let Some(mac) = &device.mac {
            if let Some(owner) = other(self.by_mac.get(mac)) {
                return Some((mac.to_string(), owner));
            }
        }
        if !device.host.is_empty() {
            if let Some(owner) = other(self.by_host.get(&device.host)) {
                return Some((device.host.clone(), owner));
            }
        }
        if !device.name.is_empty() {
            if let Some(owner) = other(self.by_name.get(&device.name)) {
                return Some((device.name.clone(), owner));
            }
        }
        None
    }

    fn unindex(&mut self, device: &Device) {
        let owned = |owner: &String| *owner == device.id;
        if let Some(mac) = &device.mac {
            if self.by_mac.get(mac).is_some_and(owned) {
                self.by_mac.remove(mac);
            }
        }
        if self.by_host.get(&device.host).is_some_and(owned) {
            self.by_host.remove(&device.host);
        }
        if self.by_name.get(&device.name).is_some_and(owned) {
            self.by_name.remove(&device.name);
        }
    }

    /// Install `device`, re-pointing every key it carries. A MAC taken
    /// from another device is cleared on that device, mirroring the store.
    fn install(&mut self, device: Arc<Device>) {
        if let Some(previous) = self.by_id.get(&device.id).cloned() {
            self.unindex(&previous);
        }
        if let Some(mac) = &device.mac {
            if let Some(owner) = self.by_mac.get(mac).filter(|o| **o != device.id).cloned() {
                if let Some(other) = self.by_id.get(&owner) {
                    let mut other = (**other).clone();
                    other.mac = None;
                    self.by_id.insert(owner, Arc::new(other));
                }
            }
            self.by_mac.insert(mac.clone(), device.id.clone());
        }
        if !device.host.is_empty() {
            self.by_host.insert(device.host.clone(), device.id.clone());
        }
        if !device.name.is_empty() {
            self.by_name.insert(device.name.clone(), device.id.clone());
        }
        self.by_id.insert(device.id.clone(), device);
    }

    fn remove(&mut self, id: &str) -> Option<Arc<Device>> {
        let device = self.by_id.remove(id)?;
        self.unindex(&device);
        Some(device)
    }
}

pub struct Registry {
    store: Arc<Store>,
    cache: Mutex<Indexes>,
    write_gate: tokio::sync::Mutex<()>,
    modify_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    /// Wrap a store and warm the cache with every persisted device.
    pub async fn open(store: Arc<Store>) -> Result<Self, CoreError> {
        let (events, _) = broadcast::channel(256);
        let registry = Self {
            store,
            cache: Mutex::new(Indexes::default()),
            write_gate: tokio::sync::Mutex::new(()),
            modify_locks: DashMap::new(),
            events,
        };
        registry.flush().await?;
        Ok(registry)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Drop the cache and reload it from the store.
    pub async fn flush(&self) -> Result<(), CoreError> {
        let devices = self.blocking(Store::get_all).await?;
        let mut fresh = Indexes::default();
        for device in devices {
            fresh.install(Arc::new(device));
        }
        let count = fresh.by_id.len();
        *self.cache.lock() = fresh;
        debug!(count, "registry cache loaded");
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, CoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// Write a device through to the store.
    ///
    /// Rejected with `Duplicate` when its MAC, host or name belongs to a
    /// different device, unless `overwrite` is set.
    pub async fn upsert(&self, device: Device, overwrite: bool) -> Result<Arc<Device>, CoreError> {
        let _gate = self.write_gate.lock().await;
        if !overwrite {
            if let Some((key, existing)) = self.cache.lock().conflict(&device) {
                return Err(CoreError::Duplicate { key, existing });
            }
        }
        let device = Arc::new(device);
        let row = Arc::clone(&device);
        self.blocking(move |store| store.upsert(&row)).await?;
        self.cache.lock().install(Arc::clone(&device));
        let _ = self.events.send(RegistryEvent::Upserted(Arc::clone(&device)));
        Ok(device)
    }

    /// Read-modify-write one device. Calls for the same id are
    /// serialized; an unchanged device is not written.
    pub async fn modify<F>(&self, id: &str, f: F) -> Result<Arc<Device>, CoreError>
    where
        F: FnOnce(&mut Device) + Send,
    {
        self.modify_or_create(id, || None, f).await
    }

    /// Like [`modify`](Self::modify), but `create` supplies a skeleton
    /// when the device is unknown.
    pub async fn modify_or_create<C, F>(
        &self,
        id: &str,
        create: C,
        f: F,
    ) -> Result<Arc<Device>, CoreError>
    where
        C: FnOnce() -> Option<Device> + Send,
        F: FnOnce(&mut Device) + Send,
    {
        let id = normalize_id(id);
        let lock = Arc::clone(self.modify_locks.entry(id.clone()).or_default().value());
        let _serial = lock.lock().await;

        let current = self.get_by_id(&id).await?;
        let (mut device, existed) = match current {
            Some(d) => ((*d).clone(), Some(d)),
            None => (create().ok_or_else(|| CoreError::not_found("device", &id))?, None),
        };
        f(&mut device);
        if let Some(existing) = existed {
            if *existing == device {
                return Ok(existing);
            }
        }
        self.upsert(device, true).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Arc<Device>>, CoreError> {
        let id = normalize_id(id);
        if let Some(d) = self.cache.lock().by_id.get(&id).cloned() {
            return Ok(Some(d));
        }
        let found = self.blocking(move |store| store.get_by_id(&id)).await?;
        Ok(found.map(|d| self.install(d)))
    }

    pub async fn get_by_mac(&self, mac: &MacAddress) -> Result<Option<Arc<Device>>, CoreError> {
        let cached = {
            let cache = self.cache.lock();
            cache.by_mac.get(mac).and_then(|id| cache.by_id.get(id).cloned())
        };
        if cached.is_some() {
            return Ok(cached);
        }
        let mac = mac.clone();
        let found = self.blocking(move |store| store.get_by_mac(&mac)).await?;
        Ok(found.map(|d| self.install(d)))
    }

    pub async fn get_by_host(&self, host: &str) -> Result<Option<Arc<Device>>, CoreError> {
        let cached = {
            let cache = self.cache.lock();
            cache.by_host.get(host).and_then(|id| cache.by_id.get(id).cloned())
        };
        if cached.is_some() {
            return Ok(cached);
        }
        let host = host.to_owned();
        let found = self.blocking(move |store| store.get_by_host(&host)).await?;
        Ok(found.map(|d| self.install(d)))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Arc<Device>>, CoreError> {
        let cached = {
            let cache = self.cache.lock();
            cache.by_name.get(name).and_then(|id| cache.by_id.get(id).cloned())
        };
        if cached.is_some() {
            return Ok(cached);
        }
        let name = name.to_owned();
        let found = self.blocking(move |store| store.get_by_name(&name)).await?;
        Ok(found.map(|d| self.install(d)))
    }

    /// Resolve a token against id, MAC, host and name.
    pub async fn get_by_any(&self, token: &str) -> Result<Arc<Device>, CoreError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CoreError::not_found("device", token));
        }
        let cached = {
            let cache = self.cache.lock();
            let id = normalize_id(token);
            let by_mac = MacAddress::parse(token)
                .ok()
                .and_then(|mac| cache.by_mac.get(&mac).cloned());
            cache
                .by_id
                .contains_key(&id)
                .then_some(id)
                .or(by_mac)
                .or_else(|| cache.by_host.get(token).cloned())
                .or_else(|| cache.by_name.get(token).cloned())
                .and_then(|id| cache.by_id.get(&id).cloned())
        };
        if let Some(d) = cached {
            return Ok(d);
        }
        let token = token.to_owned();
        let found = self.blocking(move |store| store.get_by_any(&token)).await?;
        Ok(self.install(found))
    }

    /// Every device, ordered by id.
    pub fn get_all(&self) -> Vec<Arc<Device>> {
        let mut all: Vec<Arc<Device>> = self.cache.lock().by_id.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn delete(&self, id: &str) -> Result<Arc<Device>, CoreError> {
        let _gate = self.write_gate.lock().await;
        let device = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::not_found("device", id))?;
        let (manufacturer, key) = (device.manufacturer.clone(), device.id.clone());
        self.blocking(move |store| store.delete(&manufacturer, &key))
            .await?;
        self.cache.lock().remove(&device.id);
        self.modify_locks.remove(&device.id);
        let _ = self.events.send(RegistryEvent::Removed {
            id: device.id.clone(),
        });
        Ok(device)
    }

    fn install(&self, device: Device) -> Arc<Device> {
        let device = Arc::new(device);
        self.cache.lock().install(Arc::clone(&device));
        device
    }

    // ── Groups, rooms, temperature ───────────────────────────────────

    pub async fn list_groups(&self) -> Result<Vec<Group>, CoreError> {
        self.blocking(Store::list_groups).await
    }

    pub async fn get_group(&self, id: &str) -> Result<Group, CoreError> {
        let id = id.to_owned();
        self.blocking(move |s| s.get_group(&id)).await
    }

    pub async fn create_group(&self, id: &str, name: &str) -> Result<(), CoreError> {
        let (id, name) = (id.to_owned(), name.to_owned());
        self.blocking(move |s| s.create_group(&id, &name)).await
    }

    pub async fn delete_group(&self, id: &str) -> Result<(), CoreError> {
        let id = id.to_owned();
        self.blocking(move |s| s.delete_group(&id)).await
    }

    /// Add a known device to a group.
    pub async fn add_to_group(&self, group_id: &str, device: &str) -> Result<(), CoreError> {
        let device_id = self.get_by_any(device).await?.id.clone();
        let group_id = group_id.to_owned();
        self.blocking(move |s| s.add_to_group(&group_id, &device_id)).await
    }

    pub async fn remove_from_group(&self, group_id: &str, device: &str) -> Result<(), CoreError> {
        let device_id = match self.get_by_any(device).await {
            Ok(d) => d.id.clone(),
            Err(CoreError::NotFound { .. }) => normalize_id(device),
            Err(e) => return Err(e),
        };
        let group_id = group_id.to_owned();
        self.blocking(move |s| s.remove_from_group(&group_id, &device_id))
            .await
    }

    pub async fn group_members(&self, group_id: &str) -> Result<Vec<String>, CoreError> {
        let id = group_id.to_owned();
        self.blocking(move |s| s.group_members(&id)).await
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, CoreError> {
        self.blocking(Store::list_rooms).await
    }

    pub async fn create_room(&self, room: Room) -> Result<(), CoreError> {
        self.blocking(move |s| s.create_room(&room)).await
    }

    /// Delete a room and clear it from every cached device.
    pub async fn delete_room(&self, id: &str) -> Result<(), CoreError> {
        let room = id.to_owned();
        self.blocking(move |s| s.delete_room(&room)).await?;
        let mut cache = self.cache.lock();
        let affected: Vec<String> = cache
            .by_id
            .values()
            .filter(|d| d.room_id.as_deref() == Some(id))
            .map(|d| d.id.clone())
            .collect();
        for device_id in affected {
            if let Some(d) = cache.by_id.get(&device_id) {
                let mut d = (**d).clone();
                d.room_id = None;
                cache.by_id.insert(device_id, Arc::new(d));
            }
        }
        Ok(())
    }

    /// Assign a device to a room, or clear its room with `None`.
    pub async fn set_room(
        &self,
        device: &str,
        room: Option<String>,
    ) -> Result<Arc<Device>, CoreError> {
        if let Some(room_id) = &room {
            let probe = room_id.clone();
            if !self.blocking(move |s| s.room_exists(&probe)).await? {
                return Err(CoreError::not_found("room", room_id.clone()));
            }
        }
        let id = self.get_by_any(device).await?.id.clone();
        self.modify(&id, |d| d.room_id = room).await
    }

    pub async fn list_temperature(&self) -> Result<Vec<TemperatureConfig>, CoreError> {
        self.blocking(Store::list_temperature).await
    }

    pub async fn get_temperature(&self, room_id: &str) -> Result<TemperatureConfig, CoreError> {
        let id = room_id.to_owned();
        self.blocking(move |s| s.get_temperature(&id)).await
    }

    pub async fn set_temperature(&self, cfg: TemperatureConfig) -> Result<(), CoreError> {
        cfg.validate()?;
        self.blocking(move |s| s.set_temperature(&cfg)).await
    }

    pub async fn delete_temperature(&self, room_id: &str) -> Result<(), CoreError> {
        let id = room_id.to_owned();
        self.blocking(move |s| s.delete_temperature(&id)).await
    }

    pub async fn kind_schedules(&self) -> Result<Vec<KindSchedule>, CoreError> {
        self.blocking(Store::kind_schedules).await
    }

    pub async fn set_kind_schedule(&self, schedule: KindSchedule) -> Result<(), CoreError> {
        schedule.validate()?;
        self.blocking(move |s| s.set_kind_schedule(&schedule)).await
    }

    pub async fn weekday_defaults(&self) -> Result<Vec<WeekdayDefault>, CoreError> {
        self.blocking(Store::weekday_defaults).await
    }

    pub async fn set_weekday_default(&self, default: WeekdayDefault) -> Result<(), CoreError> {
        self.blocking(move |s| s.set_weekday_default(&default)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::DeviceKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn registry() -> Registry {
        Registry::open(Arc::new(Store::open_in_memory().unwrap()))
            .await
            .unwrap()
    }

    fn device(id: &str, mac: &str, host: &str, name: &str) -> Device {
        let mut d = Device::shelly(id, DeviceKind::Gen2);
        d.mac = Some(MacAddress::parse(mac).unwrap());
        d.host = host.into();
        d.name = name.into();
        d
    }

    #[tokio::test]
    async fn every_key_resolves_after_overwrite() {
        let reg = registry().await;
        let d = device("shellyplus1-aa", "aa:aa:aa:aa:aa:01", "10.0.0.5", "porch");
        let stored = reg.upsert(d.clone(), true).await.unwrap();
        for key in ["shellyplus1-aa", "aa:aa:aa:aa:aa:01", "10.0.0.5", "porch"] {
            assert_eq!(reg.get_by_any(key).await.unwrap(), stored);
        }
    }

    #[tokio::test]
    async fn conflicting_key_is_rejected_without_overwrite() {
        let reg = registry().await;
        reg.upsert(device("shellyplus1-aa", "aa:aa:aa:aa:aa:01", "10.0.0.5", "porch"), false)
            .await
            .unwrap();

        let clash = device("shellyplus1-bb", "aa:aa:aa:aa:aa:02", "10.0.0.5", "shed");
        let err = reg.upsert(clash.clone(), false).await.unwrap_err();
        assert!(matches!(err, CoreError::Duplicate { ref existing, .. } if existing == "shellyplus1-aa"));

        reg.upsert(clash, true).await.unwrap();
        assert_eq!(reg.get_by_any("10.0.0.5").await.unwrap().id, "shellyplus1-bb");
    }

    #[tokio::test]
    async fn overwrite_moves_mac_off_previous_owner() {
        let reg = registry().await;
        reg.upsert(device("shellyplus1-aa", "aa:aa:aa:aa:aa:01", "", "a"), false)
            .await
            .unwrap();
        reg.upsert(device("shellyplus1-bb", "aa:aa:aa:aa:aa:01", "", "b"), true)
            .await
            .unwrap();

        let old = reg.get_by_id("shellyplus1-aa").await.unwrap().unwrap();
        assert_eq!(old.mac, None);
        reg.flush().await.unwrap();
        let old = reg.get_by_id("shellyplus1-aa").await.unwrap().unwrap();
        assert_eq!(old.mac, None);
    }

    #[tokio::test]
    async fn get_all_is_reflexive() {
        let reg = registry().await;
        reg.upsert(device("shellyplus1-aa", "aa:aa:aa:aa:aa:01", "", "a"), false)
            .await
            .unwrap();
        reg.upsert(device("shellyplus1-bb", "aa:aa:aa:aa:aa:02", "", "b"), false)
            .await
            .unwrap();
        for d in reg.get_all() {
            assert_eq!(reg.get_by_id(&d.id).await.unwrap().unwrap(), d);
        }
    }

    #[tokio::test]
    async fn modify_skips_unchanged_writes() {
        let reg = registry().await;
        let mut events = reg.subscribe();
        reg.upsert(device("shellyplus1-aa", "aa:aa:aa:aa:aa:01", "", "a"), false)
            .await
            .unwrap();
        assert!(matches!(events.recv().await.unwrap(), RegistryEvent::Upserted(_)));

        reg.modify("shellyplus1-aa", |d| d.name = "a".into()).await.unwrap();
        assert!(events.try_recv().is_err());

        let d = reg
            .modify("shellyplus1-aa", |d| d.status = json!({"sys": {}}))
            .await
            .unwrap();
        assert_eq!(d.status, json!({"sys": {}}));
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn modify_unknown_device_is_not_found() {
        let reg = registry().await;
        let err = reg.modify("shellyplus1-zz", |_| {}).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));

        let created = reg
            .modify_or_create(
                "shellyplus1-zz",
                || Some(Device::shelly("shellyplus1-zz", DeviceKind::Gen2)),
                |d| d.host = "10.0.0.9".into(),
            )
            .await
            .unwrap();
        assert_eq!(created.host, "10.0.0.9");
    }

    #[tokio::test]
    async fn delete_publishes_removal() {
        let reg = registry().await;
        reg.upsert(device("shellyplus1-aa", "aa:aa:aa:aa:aa:01", "", "a"), false)
            .await
            .unwrap();
        let mut events = reg.subscribe();
        reg.delete("shellyplus1-aa").await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), RegistryEvent::Removed { .. }));
        assert!(reg.get_by_any("shellyplus1-aa").await.is_err());
    }

    #[tokio::test]
    async fn set_room_requires_known_room() {
        let reg = registry().await;
        reg.upsert(device("shellyplus1-aa", "aa:aa:aa:aa:aa:01", "", "a"), false)
            .await
            .unwrap();
        assert!(reg.set_room("a", Some("attic".into())).await.is_err());

        reg.create_room(Room {
            id: "attic".into(),
            name: "Attic".into(),
        })
        .await
        .unwrap();
        let d = reg.set_room("a", Some("attic".into())).await.unwrap();
        assert_eq!(d.room_id.as_deref(), Some("attic"));

        reg.delete_room("attic").await.unwrap();
        let d = reg.get_by_id("shellyplus1-aa").await.unwrap().unwrap();
        assert_eq!(d.room_id, None);
    }
}
