// Shared transport configuration for building reqwest::Client instances.
//
// The device RPC client and the reverse proxy both build their HTTP
// clients here. Proxying needs raw bodies and untouched redirects, so
// it gets its own builder.

use std::time::Duration;

use crate::error::Error;

const USER_AGENT: &str = concat!("myhome/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(14),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` for device JSON-RPC calls.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::Transport)
    }

    /// Build a `reqwest::Client` for forwarding browser traffic.
    ///
    /// Bodies are passed through still encoded and redirects reach the
    /// browser so their `Location` can be rewritten. No overall timeout:
    /// websocket and long-poll responses stay open.
    pub fn build_forwarding_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .no_gzip()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(Error::Transport)
    }
}
