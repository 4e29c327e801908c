// ── Shared handler state ──

use std::sync::Arc;

use myhome_api::TransportConfig;
use myhome_core::{Broker, Services};

use crate::error::ProxyError;
use crate::rewrite::HtmlRewriter;

/// Cheap to clone; every handler gets its own copy.
#[derive(Clone)]
pub struct AppState {
    pub(crate) services: Arc<Services>,
    pub(crate) broker: Arc<Broker>,
    pub(crate) http: reqwest::Client,
    pub(crate) rewriter: HtmlRewriter,
}

impl AppState {
    pub fn new(services: Arc<Services>, broker: Arc<Broker>) -> Result<Self, ProxyError> {
        let http = TransportConfig::default()
            .build_forwarding_client()
            .map_err(|e| ProxyError::Startup(e.to_string()))?;
        let rewriter = HtmlRewriter::new().map_err(|e| ProxyError::Startup(e.to_string()))?;
        Ok(Self {
            services,
            broker,
            http,
            rewriter,
        })
    }

    /// Whether `/gen1/{id}` callbacks are accepted.
    pub fn gen1_enabled(&self) -> bool {
        self.services.config().enable_gen1_proxy.enabled()
    }
}
