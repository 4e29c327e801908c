//! Clap derive structures for the `myhome` CLI.
//!
//! One binary runs the daemon (`myhome daemon`) and talks to a running
//! one over MQTT (everything else except `config` and `completions`).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// myhome -- Shelly home automation over MQTT
#[derive(Debug, Parser)]
#[command(
    name = "myhome",
    version,
    about = "Run and control the myhome Shelly daemon",
    long_about = "Discovers Shelly devices over mDNS and MQTT, keeps them in a local\n\
        SQLite registry and exposes them through MQTT RPC and an HTTP proxy.\n\n\
        `myhome daemon` runs the service; the other commands talk to it.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'C', env = "MYHOME_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// MQTT broker host[:port] (overrides the config file)
    #[arg(long, short = 'b', global = true)]
    pub broker: Option<String>,

    /// Output format (defaults to the config file's `output`)
    #[arg(long, short = 'o', global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// RPC timeout, e.g. `20s` (overrides the config file)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long, env = "MYHOME_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Which channel a device call should use.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ChannelArg {
    /// Last channel that worked, falling back to the other
    Default,
    Http,
    Mqtt,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground
    Daemon(DaemonArgs),

    /// Inspect and operate devices
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Manage device groups
    #[command(alias = "g")]
    Groups(GroupsArgs),

    /// Manage rooms
    Rooms(RoomsArgs),

    /// Upload and remove device scripts
    Scripts(ScriptsArgs),

    /// Message cache operations
    Mqtt(MqttArgs),

    /// Call any daemon verb with raw JSON params
    Rpc(RpcArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Daemon ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// SQLite database path (overrides the config file)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// HTTP proxy port (overrides `proxy-port`)
    #[arg(long)]
    pub proxy_port: Option<u16>,

    /// Do not start the HTTP proxy
    #[arg(long)]
    pub no_proxy: bool,

    /// Run setup on devices the first time they are seen
    #[arg(long)]
    pub auto_setup: bool,

    /// Do not browse or query mDNS
    #[arg(long)]
    pub no_mdns: bool,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List known devices
    #[command(alias = "ls")]
    List,

    /// Show one device (id, MAC, host or name)
    #[command(alias = "get")]
    Show { device: String },

    /// Remove a device from the registry
    #[command(alias = "rm")]
    Forget { device: String },

    /// Configure a device for this daemon (MQTT, scripts, firmware)
    Setup { device: String },

    /// Re-read a device's info, config and status
    Refresh { device: String },

    /// Call a device RPC method, e.g. `Switch.Toggle '{"id":0}'`
    Call {
        device: String,
        method: String,
        /// JSON params
        params: Option<String>,
        #[arg(long, default_value = "default")]
        channel: ChannelArg,
    },

    /// Put a device in a room, or take it out when no room is given
    Room { device: String, room: Option<String> },
}

// ── Groups ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GroupsArgs {
    #[command(subcommand)]
    pub command: GroupsCommand,
}

#[derive(Debug, Subcommand)]
pub enum GroupsCommand {
    /// List groups and their members
    #[command(alias = "ls")]
    List,

    /// Show one group
    Show { group: String },

    /// Create an empty group
    Create {
        id: String,
        /// Display name
        #[arg(long, default_value = "")]
        name: String,
    },

    /// Delete a group (devices are kept)
    #[command(alias = "rm")]
    Delete { group: String },

    /// Add a device to a group
    Add { group: String, device: String },

    /// Remove a device from a group
    Remove { group: String, device: String },
}

// ── Rooms ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RoomsArgs {
    #[command(subcommand)]
    pub command: RoomsCommand,
}

#[derive(Debug, Subcommand)]
pub enum RoomsCommand {
    /// List rooms
    #[command(alias = "ls")]
    List,

    /// Create a room
    Create {
        id: String,
        #[arg(long, default_value = "")]
        name: String,
    },

    /// Delete a room; its devices lose their room
    #[command(alias = "rm")]
    Delete { room: String },
}

// ── Scripts ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ScriptsArgs {
    #[command(subcommand)]
    pub command: ScriptsCommand,
}

#[derive(Debug, Subcommand)]
pub enum ScriptsCommand {
    /// Upload a script file, skipping it when the device already runs it
    Upload {
        device: String,
        file: PathBuf,
        /// Script name on the device (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        /// Upload even when the stored version matches
        #[arg(long)]
        force: bool,
    },

    /// Stop and delete a script
    #[command(alias = "rm")]
    Delete { device: String, name: String },
}

// ── MQTT ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct MqttArgs {
    #[command(subcommand)]
    pub command: MqttCommand,
}

#[derive(Debug, Subcommand)]
pub enum MqttCommand {
    /// Republish the last cached message of a topic
    Repeat { topic: String },

    /// Show message cache usage
    Stats,
}

// ── Raw RPC ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RpcArgs {
    /// Verb, e.g. `device.list`; `server.methods` lists them all
    pub method: String,

    /// JSON params
    pub params: Option<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration (secrets masked)
    Show,

    /// Print the config file path
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
