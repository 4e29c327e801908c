// ── HTML pages and HTMX fragments ──

use std::fmt::Write as _;

use myhome_core::Device;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Devices in display order: by lowercased name, id as tie-breaker.
pub fn sorted<D: AsRef<Device>>(mut devices: Vec<D>) -> Vec<D> {
    devices.sort_by_cached_key(|d| {
        let d = d.as_ref();
        (d.display_name().to_lowercase(), d.id.clone())
    });
    devices
}

/// `<tr>` rows for the device table; also the `/htmx/devices` fragment.
pub fn device_rows<D: AsRef<Device>>(devices: &[D]) -> String {
    let mut out = String::new();
    for device in devices {
        let d = device.as_ref();
        let _ = write!(
            out,
            r##"<tr><td><a href="/devices/{token}/">{name}</a></td><td>{kind}</td><td>{host}</td><td>{room}</td><td><button hx-get="/htmx/devices/{id}" hx-target="#detail">details</button></td></tr>"##,
            token = escape(d.token()),
            name = escape(d.display_name()),
            kind = d.kind,
            host = escape(&d.host),
            room = escape(d.room_id.as_deref().unwrap_or("")),
            id = escape(&d.id),
        );
        out.push('\n');
    }
    out
}

/// The `/htmx/devices/{id}` detail card.
pub fn device_card(device: &Device) -> String {
    let status = serde_json::to_string_pretty(&device.status).unwrap_or_default();
    let mac = device.mac.as_ref().map(ToString::to_string).unwrap_or_default();
    let seen = device
        .last_seen
        .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339());
    format!(
        r#"<section class="card"><h2>{name}</h2><dl><dt>id</dt><dd>{id}</dd><dt>kind</dt><dd>{kind}</dd><dt>host</dt><dd>{host}</dd><dt>mac</dt><dd>{mac}</dd><dt>last seen</dt><dd>{seen}</dd></dl><pre>{status}</pre></section>"#,
        name = escape(device.display_name()),
        id = escape(&device.id),
        kind = device.kind,
        host = escape(&device.host),
        mac = escape(&mac),
        seen = escape(&seen),
        status = escape(&status),
    )
}

pub fn index<D: AsRef<Device>>(devices: &[D]) -> String {
    format!(
        r#"<!doctype html>
<html><head><meta charset="utf-8"><title>MyHome</title></head>
<body>
<h1>MyHome devices</h1>
<table>
<thead><tr><th>name</th><th>kind</th><th>host</th><th>room</th><th></th></tr></thead>
<tbody hx-get="/htmx/devices" hx-trigger="every 10s">
{rows}</tbody>
</table>
<div id="detail"></div>
</body></html>
"#,
        rows = device_rows(devices)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use myhome_core::DeviceKind;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn device(id: &str, name: &str, host: &str) -> Arc<Device> {
        let mut d = Device::shelly(id, DeviceKind::Gen2);
        d.name = name.to_owned();
        d.host = host.to_owned();
        Arc::new(d)
    }

    #[test]
    fn devices_sort_by_lowercased_name() {
        let devices = sorted(vec![
            device("c", "kitchen", ""),
            device("a", "Attic", ""),
            device("b", "", ""),
        ]);
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn rows_link_through_the_preferred_token() {
        let rows = device_rows(&[device("shellyplus1-1", "porch", "192.168.1.9")]);
        assert!(rows.contains(r#"href="/devices/192.168.1.9/""#));
        let rows = device_rows(&[device("shellyplus1-1", "porch", "")]);
        assert!(rows.contains(r#"href="/devices/porch/""#));
    }

    #[test]
    fn names_are_escaped() {
        let rows = device_rows(&[device("x", "<script>", "")]);
        assert!(rows.contains("&lt;script&gt;"));
        assert!(!rows.contains("<script>"));
    }
}
