//! Command dispatch: bridges CLI args -> daemon RPC verbs -> output formatting.

pub mod config_cmd;
pub mod daemon;
pub mod devices;
pub mod groups;
pub mod mqtt;
pub mod rooms;
pub mod rpc;
pub mod scripts;
pub mod util;

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::{CancellationToken, DropGuard};

use myhome_api::{MqttClient, MqttLink, MqttOptions};
use myhome_config::Config;
use myhome_core::RpcClient;
use myhome_core::rpc::envelope::request_id;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::output::Printer;

/// A connection to the daemon for the length of one command.
pub struct Session {
    client: RpcClient,
    broker: String,
    pub printer: Printer,
    pub yes: bool,
    _stop: DropGuard,
}

impl Session {
    pub async fn connect(
        cfg: &Config,
        global: &GlobalOpts,
        printer: Printer,
    ) -> Result<Self, CliError> {
        let timeout = match global.timeout {
            Some(timeout) => timeout,
            None => cfg.rpc_timeout()?,
        };

        // Each invocation is its own MQTT client; the id doubles as the
        // reply inbox name.
        let mut opts = MqttOptions::new(&cfg.mqtt_broker, request_id());
        opts.username.clone_from(&cfg.mqtt_username);
        opts.password = cfg.mqtt_password.clone().map(SecretString::from);
        let broker = opts.address();

        let cancel = CancellationToken::new();
        let link: Arc<dyn MqttLink> = MqttClient::start(&opts, cancel.child_token());
        let client = RpcClient::connect(link, timeout, &cancel)
            .await
            .map_err(|e| CliError::from_rpc(e, "devices list", &broker))?;
        tracing::debug!(%broker, src = client.src(), "connected to broker");

        Ok(Self {
            client,
            broker,
            printer,
            yes: global.yes,
            _stop: cancel.drop_guard(),
        })
    }

    /// Call a verb; lookup misses point the user at `list_command`.
    pub async fn call<P, R>(
        &self,
        verb: &str,
        params: &P,
        list_command: &'static str,
    ) -> Result<R, CliError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let value = self
            .client
            .call(verb, params)
            .await
            .map_err(|e| CliError::from_rpc(e, list_command, &self.broker))?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Dispatch a daemon-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    cfg: &Config,
    global: &GlobalOpts,
    printer: Printer,
) -> Result<(), CliError> {
    let session = Session::connect(cfg, global, printer).await?;
    match cmd {
        Command::Devices(args) => devices::handle(&session, args).await,
        Command::Groups(args) => groups::handle(&session, args).await,
        Command::Rooms(args) => rooms::handle(&session, args).await,
        Command::Scripts(args) => scripts::handle(&session, args).await,
        Command::Mqtt(args) => mqtt::handle(&session, args).await,
        Command::Rpc(args) => rpc::handle(&session, args).await,
        // Daemon, Config and Completions are handled before dispatch
        Command::Daemon(_) | Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
