//! `myhome daemon`: the registry, producers, RPC server and HTTP proxy in
//! one foreground process.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use myhome_config::Config;
use myhome_core::{Daemon, DaemonConfig};
use myhome_proxy::AppState;

use crate::cli::DaemonArgs;
use crate::error::CliError;

fn apply(args: &DaemonArgs, mut config: DaemonConfig) -> DaemonConfig {
    if let Some(database) = &args.database {
        config.database.clone_from(database);
    }
    if let Some(port) = args.proxy_port {
        config.proxy_port = port;
    }
    if args.auto_setup {
        config.auto_setup = true;
    }
    if args.no_mdns {
        config.enable_mdns = false;
    }
    config
}

pub async fn run(args: DaemonArgs, cfg: &Config) -> Result<(), CliError> {
    let config = apply(&args, cfg.to_daemon_config()?);
    if let Some(dir) = config.database.parent() {
        std::fs::create_dir_all(dir)?;
    }

    // Bind first so a taken port fails before any device is touched.
    let listener = if args.no_proxy {
        None
    } else {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.proxy_port));
        Some(TcpListener::bind(addr).await?)
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    info!(
        broker = %config.mqtt_broker,
        database = %config.database.display(),
        "starting daemon"
    );
    let daemon = Daemon::connect(config, &cancel)
        .await
        .map_err(CliError::Fatal)?;

    let proxy = match listener {
        Some(listener) => {
            let state = match AppState::new(daemon.services().clone(), daemon.broker().clone()) {
                Ok(state) => state,
                Err(e) => {
                    if let Err(stop) = daemon.shutdown().await {
                        warn!(error = %stop, "daemon shutdown failed");
                    }
                    return Err(e.into());
                }
            };
            Some(tokio::spawn(myhome_proxy::serve_on(
                listener,
                state,
                daemon.cancel_token().clone(),
            )))
        }
        None => None,
    };

    let outcome = daemon.wait().await;
    if let Some(proxy) = proxy {
        match proxy.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP proxy failed"),
            Err(e) => error!(error = %e, "HTTP proxy task panicked"),
        }
    }
    info!("daemon stopped");
    outcome.map_err(CliError::Fatal)
}

/// Cancel on SIGINT or SIGTERM.
async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("received SIGINT, shutting down");
                    cancel.cancel();
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = term.recv() => info!("received SIGTERM, shutting down"),
            () = cancel.cancelled() => return,
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received Ctrl-C, shutting down"),
            () = cancel.cancelled() => return,
        }
    }
    cancel.cancel();
}
