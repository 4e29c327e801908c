//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use myhome_config::ConfigError;
use myhome_core::{CoreError, ErrorKind};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("No answer from the daemon within {seconds}s")]
    #[diagnostic(
        code(myhome::timeout),
        help(
            "Is `myhome daemon` running against the same broker?\n\
             Broker: {broker}\n\
             Raise the limit with --timeout or `rpc-timeout` in the config."
        )
    )]
    Timeout { seconds: u64, broker: String },

    #[error("Transport failure: {message}")]
    #[diagnostic(
        code(myhome::transport),
        help("Check that the MQTT broker and the device are reachable.")
    )]
    Transport { message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(myhome::not_found), help("Run: myhome {list_command} to see what exists"))]
    NotFound {
        message: String,
        list_command: &'static str,
    },

    #[error("{message}")]
    #[diagnostic(code(myhome::conflict))]
    Conflict { message: String },

    // ── Remote errors ────────────────────────────────────────────────
    #[error("{message} (code {code})")]
    #[diagnostic(code(myhome::rpc))]
    Rpc { code: i64, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(myhome::validation))]
    Validation { field: String, reason: String },

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(myhome::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(myhome::config),
        help("Create a default file with: myhome config init")
    )]
    Config(#[from] ConfigError),

    // ── Daemon ───────────────────────────────────────────────────────
    #[error("Daemon stopped: {0}")]
    #[diagnostic(code(myhome::fatal))]
    Fatal(CoreError),

    #[error("HTTP proxy: {0}")]
    #[diagnostic(code(myhome::proxy))]
    Proxy(#[from] myhome_proxy::ProxyError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(myhome::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Transport { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Classify an RPC failure, naming the list command for lookup misses.
    pub fn from_rpc(err: CoreError, list_command: &'static str, broker: &str) -> Self {
        match err {
            CoreError::Timeout { timeout_ms, .. } => Self::Timeout {
                seconds: timeout_ms.div_ceil(1000),
                broker: broker.to_owned(),
            },
            CoreError::NotFound { .. } => Self::NotFound {
                message: err.to_string(),
                list_command,
            },
            CoreError::Remote { code, message } => match code {
                -32004 => Self::NotFound {
                    message,
                    list_command,
                },
                -32009 => Self::Conflict { message },
                -32000 => Self::Transport { message },
                _ => Self::Rpc { code, message },
            },
            other => match other.kind() {
                ErrorKind::Transport => Self::Transport {
                    message: other.to_string(),
                },
                _ => Self::Rpc {
                    code: other.rpc_code(),
                    message: other.to_string(),
                },
            },
        }
    }
}
