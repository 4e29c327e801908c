use thiserror::Error;

/// Top-level error type for the `myhome-api` crate.
///
/// Covers every transport the daemon speaks: device HTTP RPC, MQTT,
/// and mDNS. `myhome-core` folds these into its domain error kinds.
#[derive(Debug, Error)]
pub enum Error {
    // ── HTTP ────────────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status without a recognizable RPC error body.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Device RPC ──────────────────────────────────────────────────
    /// The device answered with a `{code, message}` error object.
    #[error("Device error {code}: {message}")]
    Rpc { code: i64, message: String },

    // ── MQTT ────────────────────────────────────────────────────────
    /// The MQTT client refused or failed a request.
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// The connection to the broker has been lost for too long.
    #[error("MQTT connection lost ({failures} consecutive failed checks)")]
    MqttUnrecoverable { failures: u32 },

    /// A channel the transport depends on was closed.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    // ── Discovery ───────────────────────────────────────────────────
    /// mDNS daemon failure.
    #[error("mDNS error: {0}")]
    Mdns(String),

    /// The service resolved, but only to non-IPv4 addresses.
    #[error("{name} did not resolve to an IPv4 address")]
    NonIpv4 { name: String },

    /// Nothing answered for this name within the timeout.
    #[error("{name} did not resolve")]
    Unresolved { name: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying on
    /// another channel.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::Mqtt(_) | Self::ChannelClosed(_) => true,
            _ => false,
        }
    }

    /// The remote error code, if the device produced one.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Mqtt(err.to_string())
    }
}

impl From<mdns_sd::Error> for Error {
    fn from(err: mdns_sd::Error) -> Self {
        Self::Mdns(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn timeouts_are_transient_device_errors_are_not() {
        assert!(Error::Timeout { timeout_ms: 10 }.is_transient());
        assert!(
            !Error::Rpc {
                code: -103,
                message: "bad".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn rpc_code_is_exposed() {
        let err = Error::Rpc {
            code: 404,
            message: "no such method".into(),
        };
        assert_eq!(err.rpc_code(), Some(404));
        assert_eq!(Error::Mqtt("x".into()).rpc_code(), None);
    }
}
