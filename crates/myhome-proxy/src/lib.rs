//! HTTP surface of the myhome daemon.
//!
//! - `/devices/<token>/...` reverse-proxies a device's web UI, rewriting
//!   HTML and redirects so it works under the prefix, and splices
//!   WebSocket upgrades.
//! - `POST /rpc` exposes the same verb table as `myhome/rpc` on MQTT.
//! - `GET /events` streams registry changes as server-sent events.
//! - `/`, `/htmx/...` render the device list.
//! - `/gen1/<id>` turns Gen1 action URLs into sensor topics.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod error;
mod forward;
mod pages;
pub mod rewrite;
mod routes;
mod state;

pub use error::ProxyError;
pub use routes::router;
pub use state::AppState;

/// Bind `addr` and serve until `cancel` fires.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), ProxyError> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, state, cancel).await
}

/// Serve on an already bound listener until `cancel` fires.
pub async fn serve_on(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), ProxyError> {
    info!(addr = %listener.local_addr()?, "HTTP proxy listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("HTTP proxy stopped");
    Ok(())
}
