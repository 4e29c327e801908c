// `_shelly._tcp.local.` browsing. Every resolved entry also feeds the
// shared resolver used by the reverse proxy.

use myhome_api::mdns::{MdnsResolver, SHELLY_SERVICE, ServiceEntry, browse};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DeviceUpdate, SUBSCRIPTION_QUEUE, UpdateSender, forward};
use crate::error::CoreError;
use crate::model::{is_shelly_id, normalize_id};

pub fn spawn(
    resolver: MdnsResolver,
    updates: UpdateSender,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, CoreError> {
    let rx = browse(SHELLY_SERVICE, SUBSCRIPTION_QUEUE, cancel.clone())?;
    Ok(forward("mdns", rx, updates, cancel, move |entry| {
        resolver.record(&entry);
        parse(&entry)
    }))
}

pub fn parse(entry: &ServiceEntry) -> Option<DeviceUpdate> {
    let id = normalize_id(entry.instance());
    if !is_shelly_id(&id) {
        debug!(instance = entry.instance(), "ignoring non-shelly service");
        return None;
    }
    match entry.ipv4() {
        Ok(ip) => Some(DeviceUpdate::Discovered { id, ip }),
        Err(e) => {
            warn!(device = %id, error = %e, "mDNS entry without IPv4");
            None
        }
    }
}
