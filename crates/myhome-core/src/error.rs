// ── Core error types ──
//
// Domain errors for the daemon. Transport-layer failures from
// `myhome_api` are folded in through `From`, and every variant maps to
// one of five kinds that decide retries, RPC error codes and HTTP
// statuses.

use strum::{Display, EnumString};
use thiserror::Error;

/// What kind of failure an error is, independent of its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Network, MQTT or HTTP trouble. Worth retrying elsewhere.
    Transport,
    /// Malformed input; never retried.
    Protocol,
    /// The device answered with an error object.
    Device,
    /// Lookup miss or conflicting write.
    State,
    /// The daemon cannot continue.
    Fatal,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport ────────────────────────────────────────────────────
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{name} did not resolve to an IPv4 address")]
    NonIpv4 { name: String },

    // ── Protocol ─────────────────────────────────────────────────────
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("Invalid dialog: {reason}")]
    InvalidDialog { reason: String },

    #[error("Method {method} not supported by {device}")]
    MethodNotSupported { device: String, method: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Device ───────────────────────────────────────────────────────
    #[error("Device error {code}: {message}")]
    Device { code: i64, message: String },

    // ── State ────────────────────────────────────────────────────────
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    #[error("{key} already belongs to {existing}")]
    Duplicate { key: String, existing: String },

    #[error("{what} already in progress")]
    Busy { what: String },

    // ── Fatal ────────────────────────────────────────────────────────
    #[error("Method {method} registered twice")]
    DuplicateMethod { method: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("MQTT connection unrecoverable after {failures} failed checks")]
    MqttUnrecoverable { failures: u32 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Remote ───────────────────────────────────────────────────────
    /// An error reply from another RPC endpoint, classified by its code.
    #[error("{message} (code {code})")]
    Remote { code: i64, message: String },

    // ── Composite ────────────────────────────────────────────────────
    #[error("Setup step '{step}' failed: {source}")]
    Setup {
        step: &'static str,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity_type: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            identifier: identifier.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } | Self::NonIpv4 { .. } => {
                ErrorKind::Transport
            }
            Self::MethodNotFound { .. }
            | Self::InvalidParams { .. }
            | Self::InvalidDialog { .. }
            | Self::MethodNotSupported { .. }
            | Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Device { .. } => ErrorKind::Device,
            Self::NotFound { .. } | Self::Duplicate { .. } | Self::Busy { .. } => ErrorKind::State,
            Self::DuplicateMethod { .. }
            | Self::Storage { .. }
            | Self::MqttUnrecoverable { .. }
            | Self::Config { .. }
            | Self::Internal(_) => ErrorKind::Fatal,
            Self::Setup { source, .. } => source.kind(),
            Self::Remote { code, .. } => match code {
                1 | -32005 | -32602..=-32600 => ErrorKind::Protocol,
                -32009 | -32004 => ErrorKind::State,
                -32000 => ErrorKind::Transport,
                -32603 => ErrorKind::Fatal,
                _ => ErrorKind::Device,
            },
        }
    }

    /// Whether another channel might succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// JSON-RPC style error code for RPC replies.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::InvalidDialog { .. } => 1,
            Self::MethodNotFound { .. } => -32601,
            Self::InvalidParams { .. } => -32602,
            Self::Protocol { .. } => -32600,
            Self::Device { code, .. } | Self::Remote { code, .. } => *code,
            Self::NotFound { .. } => -32004,
            Self::Duplicate { .. } | Self::Busy { .. } => -32009,
            Self::MethodNotSupported { .. } => -32005,
            Self::Setup { source, .. } => source.rpc_code(),
            Self::Transport { .. } | Self::Timeout { .. } | Self::NonIpv4 { .. } => -32000,
            _ => -32603,
        }
    }

    /// HTTP status for the JSON-RPC-over-HTTP surface.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MethodNotFound { .. } | Self::NotFound { .. } => 404,
            Self::Duplicate { .. } | Self::Busy { .. } => 409,
            Self::Timeout { .. } => 504,
            Self::Setup { source, .. } => source.http_status(),
            _ => match self.kind() {
                ErrorKind::Protocol | ErrorKind::State => 400,
                ErrorKind::Transport | ErrorKind::Device => 502,
                ErrorKind::Fatal => 500,
            },
        }
    }

    /// Attach the setup step that produced this error.
    pub fn in_step(self, step: &'static str) -> Self {
        Self::Setup {
            step,
            source: Box::new(self),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<myhome_api::Error> for CoreError {
    fn from(err: myhome_api::Error) -> Self {
        use myhome_api::Error as Api;
        match err {
            Api::Rpc { code, message } => Self::Device { code, message },
            Api::Timeout { timeout_ms } => Self::Timeout {
                operation: "request".into(),
                timeout_ms,
            },
            Api::NonIpv4 { name } => Self::NonIpv4 { name },
            Api::MqttUnrecoverable { failures } => Self::MqttUnrecoverable { failures },
            Api::Deserialization { message, body: _ } => Self::Protocol { message },
            other @ (Api::Transport(_)
            | Api::Http { .. }
            | Api::Mqtt(_)
            | Api::ChannelClosed(_)
            | Api::Mdns(_)
            | Api::Unresolved { .. }) => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol {
            message: err.to_string(),
        }
    }
}
