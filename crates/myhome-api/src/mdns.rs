// ── mDNS discovery ──
//
// Shelly Gen2+ devices announce `_shelly._tcp.local.` with their device
// id as instance name. The browser turns resolved services into plain
// `ServiceEntry` values so the rest of the daemon never sees mdns-sd
// types.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;

pub const SHELLY_SERVICE: &str = "_shelly._tcp.local.";

/// One resolved service announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// e.g. `shelly1minig3-54320464a1d0._shelly._tcp.local.`
    pub fullname: String,
    /// e.g. `shelly1minig3-54320464a1d0.local.`
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
}

impl ServiceEntry {
    /// The instance label, which for Shelly devices is the device id.
    pub fn instance(&self) -> &str {
        self.fullname
            .split_once('.')
            .map_or(self.fullname.as_str(), |(instance, _)| instance)
    }

    /// Pick an IPv4 address, preferring private LAN ranges.
    pub fn ipv4(&self) -> Result<Ipv4Addr, Error> {
        let mut v4: Vec<Ipv4Addr> = self
            .addresses
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(v4) => Some(*v4),
                IpAddr::V6(_) => None,
            })
            .collect();
        v4.sort_by_key(|ip| (!ip.is_private(), ip.is_link_local(), *ip));
        v4.first().copied().ok_or_else(|| Error::NonIpv4 {
            name: self.instance().to_owned(),
        })
    }
}

/// Browse a service type until `cancel` fires, forwarding each resolved
/// entry. The channel drops entries while the consumer is busy.
pub fn browse(
    service: &str,
    qlen: usize,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<ServiceEntry>, Error> {
    let daemon = ServiceDaemon::new()?;
    let events = daemon.browse(service)?;
    let (tx, rx) = mpsc::channel(qlen.max(1));
    let service = service.to_owned();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv_async() => {
                    let Ok(event) = event else { break };
                    if let ServiceEvent::ServiceResolved(info) = event {
                        let entry = ServiceEntry {
                            fullname: info.get_fullname().to_owned(),
                            hostname: info.get_hostname().to_owned(),
                            addresses: info.get_addresses().iter().copied().collect(),
                        };
                        debug!(instance = entry.instance(), "mDNS service resolved");
                        if tx.try_send(entry).is_err() {
                            debug!("mDNS consumer busy, dropping entry");
                        }
                    }
                }
            }
        }
        if let Err(e) = daemon.stop_browse(&service) {
            debug!(error = %e, "stop_browse failed");
        }
        let _ = daemon.shutdown();
    });

    Ok(rx)
}

/// Name → IPv4 cache fed by browsing, answering lookups by device id or
/// `.local` hostname.
#[derive(Clone, Default)]
pub struct MdnsResolver {
    entries: Arc<Mutex<HashMap<String, (Ipv4Addr, Instant)>>>,
}

const RESOLVER_TTL: Duration = Duration::from_secs(600);

impl MdnsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember an entry's IPv4 under its instance name and hostname.
    pub fn record(&self, entry: &ServiceEntry) {
        let Ok(ip) = entry.ipv4() else { return };
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.insert(entry.instance().to_lowercase(), (ip, now));
        let host = entry.hostname.trim_end_matches('.').to_lowercase();
        if let Some(short) = host.strip_suffix(".local") {
            entries.insert(short.to_owned(), (ip, now));
        }
        entries.insert(host, (ip, now));
    }

    /// Look up a name seen within the cache lifetime.
    pub fn lookup(&self, name: &str) -> Option<Ipv4Addr> {
        let key = name.trim_end_matches('.').to_lowercase();
        let entries = self.entries.lock();
        entries
            .get(&key)
            .filter(|(_, seen)| seen.elapsed() < RESOLVER_TTL)
            .map(|(ip, _)| *ip)
    }

    /// Browse for a single name, waiting at most `timeout`.
    pub async fn resolve(&self, name: &str, timeout: Duration) -> Result<Ipv4Addr, Error> {
        if let Some(ip) = self.lookup(name) {
            return Ok(ip);
        }
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let mut rx = browse(SHELLY_SERVICE, 16, cancel)?;
        let wanted = name.trim_end_matches('.').to_lowercase();

        let found = tokio::time::timeout(timeout, async {
            while let Some(entry) = rx.recv().await {
                self.record(&entry);
                let host = entry.hostname.trim_end_matches('.').to_lowercase();
                if entry.instance().eq_ignore_ascii_case(&wanted)
                    || host == wanted
                    || host.strip_suffix(".local") == Some(wanted.as_str())
                {
                    return Some(entry);
                }
            }
            None
        })
        .await;

        match found {
            Ok(Some(entry)) => entry.ipv4(),
            Ok(None) => {
                warn!(name, "mDNS browser stopped");
                Err(Error::Unresolved { name: name.into() })
            }
            Err(_) => Err(Error::Unresolved { name: name.into() }),
        }
    }
}
