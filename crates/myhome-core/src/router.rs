// ── LAN address helpers ──
//
// MAC → IPv4 from the kernel ARP table, and this host's own LAN address
// for telling devices where the broker lives.

use std::collections::HashMap;
use std::net::{Ipv4Addr, UdpSocket};
use std::path::PathBuf;

use tracing::debug;

use crate::model::MacAddress;

pub const DEFAULT_BROKER: &str = "localhost:1883";
const ARP_TABLE: &str = "/proc/net/arp";
/// `ATF_COM`: the entry is complete.
const ATF_COM: u32 = 0x2;

#[derive(Debug, Clone)]
pub struct Router {
    arp_path: PathBuf,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            arp_path: PathBuf::from(ARP_TABLE),
        }
    }
}

impl Router {
    pub fn with_arp_table(path: impl Into<PathBuf>) -> Self {
        Self {
            arp_path: path.into(),
        }
    }

    /// Current IPv4 of `mac`, if the kernel has a complete entry for it.
    pub async fn lookup(&self, mac: &MacAddress) -> Option<Ipv4Addr> {
        let text = match tokio::fs::read_to_string(&self.arp_path).await {
            Ok(t) => t,
            Err(e) => {
                debug!(path = %self.arp_path.display(), error = %e, "ARP table unavailable");
                return None;
            }
        };
        parse_arp(&text).remove(mac)
    }
}

pub fn parse_arp(text: &str) -> HashMap<MacAddress, Ipv4Addr> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let [ip, _hw_type, flags, mac, ..] = cols.as_slice() else {
                return None;
            };
            let flags = u32::from_str_radix(flags.trim_start_matches("0x"), 16).ok()?;
            if flags & ATF_COM == 0 {
                return None;
            }
            Some((MacAddress::parse(mac).ok()?, ip.parse().ok()?))
        })
        .collect()
}

/// The address this host uses to reach the LAN. No packet is sent.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 168, 0, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// `host:port` of the broker as devices should see it. An empty broker
/// means `localhost:1883`; loopback names are replaced by `lan`.
pub fn device_broker(broker: &str, lan: Option<Ipv4Addr>) -> String {
    let broker = if broker.trim().is_empty() {
        DEFAULT_BROKER
    } else {
        broker.trim()
    };
    let broker = broker.strip_prefix("mqtt://").unwrap_or(broker);
    let (host, port) = broker.rsplit_once(':').unwrap_or((broker, "1883"));
    let loopback = host == "localhost"
        || host
            .parse::<Ipv4Addr>()
            .is_ok_and(|ip| ip.is_loopback() || ip.is_unspecified());
    match lan {
        Some(ip) if loopback => format!("{ip}:{port}"),
        _ => format!("{host}:{port}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    const ARP: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.76     0x1         0x2         54:32:04:64:a1:d0     *        eth0
192.168.1.80     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.1      0x1         0x2         AA:BB:CC:DD:EE:01     *        eth0
";

    #[test]
    fn incomplete_entries_are_skipped() {
        let table = parse_arp(ARP);
        assert_eq!(table.len(), 2);
        let mac = MacAddress::parse("aa:bb:cc:dd:ee:01").unwrap();
        assert_eq!(table[&mac], Ipv4Addr::new(192, 168, 1, 1));
    }

    #[tokio::test]
    async fn lookup_reads_the_table_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ARP.as_bytes()).unwrap();
        let router = Router::with_arp_table(file.path());
        let mac = MacAddress::parse("54:32:04:64:a1:d0").unwrap();
        assert_eq!(router.lookup(&mac).await, Some(Ipv4Addr::new(192, 168, 1, 76)));

        let missing = Router::with_arp_table("/nonexistent/arp");
        assert_eq!(missing.lookup(&mac).await, None);
    }

    #[test]
    fn loopback_brokers_are_replaced_by_the_lan_address() {
        let lan = Some(Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(device_broker("", lan), "192.168.1.10:1883");
        assert_eq!(device_broker("127.0.0.1:1884", lan), "192.168.1.10:1884");
        assert_eq!(device_broker("mqtt.lan:1883", lan), "mqtt.lan:1883");
        assert_eq!(device_broker("broker.lan", None), "broker.lan:1883");
        assert_eq!(device_broker("", None), "localhost:1883");
    }
}
