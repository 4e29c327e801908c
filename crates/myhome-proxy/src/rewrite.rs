// ── Response rewriting ──
//
// Device web UIs assume they are served from `/`. Behind the proxy they
// live under `/devices/<token>/`, so HTML gets a `<base>` tag, its
// root-relative links are prefixed, and redirects are pointed back at
// the proxy.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use regex::{Captures, Regex};
use url::Url;

pub const WS_PATCH_PATH: &str = "/_ws_patch.js";

/// Path prefix every proxied URL of `token` lives under, without the
/// trailing slash.
pub fn device_prefix(token: &str) -> String {
    format!("/devices/{token}")
}

pub fn is_html(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/html"))
}

pub fn gunzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len() * 4);
    GzDecoder::new(body).read_to_end(&mut out)?;
    Ok(out)
}

pub fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Compiled patterns for [`HtmlRewriter::rewrite`]. Built once per server.
#[derive(Debug, Clone)]
pub struct HtmlRewriter {
    attr: Regex,
    head_open: Regex,
    head_close: Regex,
    base: Regex,
}

impl HtmlRewriter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            attr: Regex::new(r#"(?i)\b(href|src|action)(\s*=\s*)(["'])/([^"']*)"#)?,
            head_open: Regex::new(r"(?i)<head(\s[^>]*)?>")?,
            head_close: Regex::new(r"(?i)</head\s*>")?,
            base: Regex::new(r"(?i)<base[\s>]")?,
        })
    }

    pub fn rewrite(&self, html: &str, token: &str) -> String {
        let prefix = device_prefix(token);
        let own = format!("{}/", prefix.trim_start_matches('/'));
        let patch = WS_PATCH_PATH.trim_start_matches('/');

        let mut out = self
            .attr
            .replace_all(html, |caps: &Captures| {
                let path = &caps[4];
                // `//host/x` is protocol-relative, and ours are already done.
                if path.starts_with('/') || path.starts_with(&own) || path == patch {
                    caps[0].to_owned()
                } else {
                    format!("{}{}{}{prefix}/{path}", &caps[1], &caps[2], &caps[3])
                }
            })
            .into_owned();

        let script = format!(r#"<script src="{WS_PATCH_PATH}" defer></script>"#);
        if !out.contains(&script) {
            let at = self.head_close.find(&out).map_or(0, |m| m.start());
            out.insert_str(at, &script);
        }

        if !self.base.is_match(&out) {
            let base = format!(r#"<base href="{prefix}/">"#);
            let at = self.head_open.find(&out).map_or(0, |m| m.end());
            out.insert_str(at, &base);
        }
        out
    }
}

/// Point a backend redirect back through the proxy.
///
/// Root-relative targets and absolute ones aimed at the backend or at the
/// proxy itself are moved under the device prefix; anything else (other
/// hosts, relative paths) is returned untouched.
pub fn rewrite_location(location: &str, token: &str, backend: &str, proxy_host: Option<&str>) -> String {
    let prefix = device_prefix(token);
    if let Some(rest) = location.strip_prefix('/') {
        if rest.starts_with('/') || location.starts_with(&format!("{prefix}/")) {
            return location.to_owned();
        }
        return format!("{prefix}/{rest}");
    }

    let Ok(url) = Url::parse(location) else {
        return location.to_owned();
    };
    let Some(host) = url.host_str() else {
        return location.to_owned();
    };
    let authority = url
        .port()
        .map_or_else(|| host.to_owned(), |port| format!("{host}:{port}"));
    let ours = [Some(backend), proxy_host]
        .into_iter()
        .flatten()
        .any(|candidate| candidate == authority || candidate == host);
    if !ours {
        return location.to_owned();
    }

    let path = url.path();
    let mut out = if path.starts_with(&format!("{prefix}/")) {
        path.to_owned()
    } else {
        format!("{prefix}{path}")
    };
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    out
}
