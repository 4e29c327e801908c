// ── Device forwarding ──
//
// `/devices/<token>/<rest>` → `http://<backend>/<rest>`. Plain requests
// are buffered and replayed; WebSocket upgrades are answered with the
// backend's 101 and then spliced byte for byte.

use std::net::{Ipv4Addr, SocketAddrV4};

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{
    CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION, ORIGIN, UPGRADE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

use myhome_core::CoreError;

use crate::error::ProxyError;
use crate::rewrite::{gunzip, gzip, is_html, rewrite_location};
use crate::state::AppState;

/// Largest request body replayed to a device (firmware images fit).
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// ── Token resolution ────────────────────────────────────────────────

/// Turn a URL token into the `host[:port]` to forward to.
///
/// Literal addresses win, then names already seen on mDNS, then the
/// registry (any of id, MAC, host, name), then an active mDNS query.
pub(crate) async fn resolve(state: &AppState, token: &str) -> Result<String, ProxyError> {
    if token.parse::<Ipv4Addr>().is_ok() || token.parse::<SocketAddrV4>().is_ok() {
        return Ok(token.to_owned());
    }
    let services = &state.services;
    if let Some(ip) = services.resolver().lookup(token) {
        return Ok(ip.to_string());
    }
    match services.registry().get_by_any(token).await {
        Ok(device) if !device.host.is_empty() => return Ok(device.host.clone()),
        Ok(device) => {
            if let Some(ip) = services.address_of(&device).await {
                return Ok(ip.to_string());
            }
        }
        Err(CoreError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }
    let config = services.config();
    if config.enable_mdns {
        if let Ok(ip) = services.resolver().resolve(token, config.mdns_timeout).await {
            return Ok(ip.to_string());
        }
    }
    Err(ProxyError::UnknownDevice {
        token: token.to_owned(),
    })
}

// ── Forwarding ──────────────────────────────────────────────────────

pub(crate) async fn forward(
    state: &AppState,
    token: &str,
    rest: &str,
    req: Request,
) -> Result<Response, ProxyError> {
    let backend = resolve(state, token).await?;
    let mut target = format!("http://{backend}/{rest}");
    if let Some(query) = req.uri().query() {
        target.push('?');
        target.push_str(query);
    }
    debug!(token, %target, method = %req.method(), "forwarding");

    if is_websocket(req.headers()) {
        return websocket(state, &backend, &target, req).await;
    }

    let proxy_host = header_str(req.headers(), &HOST).map(str::to_owned);
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;

    let mut outbound = state
        .http
        .request(parts.method.clone(), &target)
        .headers(outbound_headers(&parts.headers));
    if !body.is_empty() {
        outbound = outbound.body(body);
    }
    let upstream = outbound
        .send()
        .await
        .map_err(|e| ProxyError::backend(&backend, e))?;

    let status = upstream.status();
    let mut headers = inbound_headers(upstream.headers());
    if let Some(location) = header_str(&headers, &LOCATION) {
        let rewritten = rewrite_location(location, token, &backend, proxy_host.as_deref());
        if let Ok(value) = HeaderValue::from_str(&rewritten) {
            headers.insert(LOCATION, value);
        }
    }

    // Only bodies we can decode are rewritten; any other encoding
    // streams through untouched.
    let encoding = header_str(&headers, &CONTENT_ENCODING).map(str::trim);
    let gzipped = encoding.is_some_and(|enc| enc.eq_ignore_ascii_case("gzip"));
    let decodable = gzipped || encoding.is_none_or(|enc| enc.eq_ignore_ascii_case("identity"));
    let rewrite = header_str(&headers, &CONTENT_TYPE).is_some_and(is_html)
        && decodable
        && parts.method != Method::HEAD
        && has_body(status);
    let body = if rewrite {
        let raw = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::backend(&backend, e))?;
        let html = if gzipped {
            gunzip(&raw).map_err(|e| ProxyError::backend(&backend, e))?
        } else {
            raw.to_vec()
        };
        let rewritten = state
            .rewriter
            .rewrite(&String::from_utf8_lossy(&html), token)
            .into_bytes();
        let encoded = if gzipped { gzip(&rewritten)? } else { rewritten };
        headers.insert(CONTENT_LENGTH, HeaderValue::from(encoded.len()));
        Body::from(encoded)
    } else {
        Body::from_stream(upstream.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

// ── WebSocket ───────────────────────────────────────────────────────

fn is_websocket(headers: &HeaderMap) -> bool {
    header_str(headers, &UPGRADE).is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

async fn websocket(
    state: &AppState,
    backend: &str,
    target: &str,
    mut req: Request,
) -> Result<Response, ProxyError> {
    let client_side = hyper::upgrade::on(&mut req);

    // Upgrade handshake headers travel as-is; only Host and Origin
    // must name the device.
    let mut headers = HeaderMap::new();
    for (name, value) in req.headers() {
        if name != HOST && name != ORIGIN {
            headers.append(name.clone(), value.clone());
        }
    }
    let origin = HeaderValue::from_str(&format!("http://{backend}"))
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;
    headers.insert(ORIGIN, origin);

    let upstream = state
        .http
        .get(target)
        .headers(headers)
        .send()
        .await
        .map_err(|e| ProxyError::backend(backend, e))?;

    let status = upstream.status();
    let reply_headers = upstream.headers().clone();
    if status != StatusCode::SWITCHING_PROTOCOLS {
        debug!(%target, %status, "backend refused websocket upgrade");
        let body = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::backend(backend, e))?;
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = inbound_headers(&reply_headers);
        return Ok(response);
    }

    let mut device_side = upstream
        .upgrade()
        .await
        .map_err(|e| ProxyError::backend(backend, e))?;
    let backend = backend.to_owned();
    tokio::spawn(async move {
        let browser = match client_side.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(%backend, error = %e, "browser side of websocket upgrade failed");
                return;
            }
        };
        let mut browser = TokioIo::new(browser);
        match tokio::io::copy_bidirectional(&mut browser, &mut device_side).await {
            Ok((up, down)) => debug!(%backend, up, down, "websocket closed"),
            Err(e) => debug!(%backend, error = %e, "websocket ended"),
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *response.headers_mut() = reply_headers;
    Ok(response)
}

// ── Header plumbing ─────────────────────────────────────────────────

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Browser headers minus hop-by-hop ones; reqwest sets Host and length.
fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) && name != HOST && name != CONTENT_LENGTH {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

fn inbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

fn has_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}
