use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use myhome_api::{MqttLink, ShellyHttpClient};
use tokio_util::sync::CancellationToken;

use super::proxy::{ProxyOptions, ShellyProxy};
use super::{DeviceConnector, DeviceRpc};
use crate::error::CoreError;
use crate::model::Device;

/// Lazily started proxies, one per device id.
pub struct ProxyPool {
    proxies: DashMap<String, Arc<ShellyProxy>>,
    http: ShellyHttpClient,
    link: Arc<dyn MqttLink>,
    opts: ProxyOptions,
    cancel: CancellationToken,
}

impl ProxyPool {
    pub fn new(
        http: ShellyHttpClient,
        link: Arc<dyn MqttLink>,
        opts: ProxyOptions,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            proxies: DashMap::new(),
            http,
            link,
            opts,
            cancel: cancel.child_token(),
        }
    }

    /// The proxy for `device`, started on first use. A changed host is
    /// pushed to an existing proxy.
    pub async fn get(&self, device: &Device) -> Result<Arc<ShellyProxy>, CoreError> {
        if let Some(proxy) = self.proxies.get(&device.id).map(|p| Arc::clone(p.value())) {
            proxy.set_host(&device.host);
            return Ok(proxy);
        }
        let proxy = ShellyProxy::start(
            &device.id,
            &device.host,
            self.http.clone(),
            Arc::clone(&self.link),
            self.opts.clone(),
            &self.cancel,
        )
        .await?;
        // Another caller may have won the race; keep theirs.
        let kept = Arc::clone(
            self.proxies
                .entry(device.id.clone())
                .or_insert_with(|| Arc::clone(&proxy))
                .value(),
        );
        if !Arc::ptr_eq(&kept, &proxy) {
            proxy.stop();
        }
        Ok(kept)
    }

    pub fn remove(&self, id: &str) {
        if let Some((_, proxy)) = self.proxies.remove(id) {
            proxy.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[async_trait]
impl DeviceConnector for ProxyPool {
    async fn connect(&self, device: &Device) -> Result<Arc<dyn DeviceRpc>, CoreError> {
        let proxy: Arc<dyn DeviceRpc> = self.get(device).await?;
        Ok(proxy)
    }
}
