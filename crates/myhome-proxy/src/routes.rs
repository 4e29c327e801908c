// ── HTTP routes ──

use std::any::Any;
use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use myhome_api::MqttLink;
use myhome_core::events::gen1;
use myhome_core::{CoreError, RegistryEvent};

use crate::error::ProxyError;
use crate::forward;
use crate::pages;
use crate::rewrite::WS_PATCH_PATH;
use crate::state::AppState;

const WS_PATCH: &str = include_str!("../assets/ws_patch.js");

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(index))
        .route("/_health", get(health))
        .route(WS_PATCH_PATH, get(ws_patch))
        .route("/rpc", post(rpc))
        .route("/events", get(events))
        .route("/htmx/devices", get(htmx_devices))
        .route("/htmx/devices/{id}", get(htmx_device))
        .route("/devices/{token}", any(device_bare))
        .route("/devices/{token}/", any(device_root))
        .route("/devices/{token}/{*rest}", any(device_path));
    if state.gen1_enabled() {
        app = app.route("/gen1/{id}", get(gen1_callback));
    }
    app.fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Static endpoints ────────────────────────────────────────────────

async fn health() -> &'static str {
    "OK"
}

async fn ws_patch() -> impl IntoResponse {
    (
        [
            (CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        WS_PATCH,
    )
}

async fn not_found() -> ProxyError {
    ProxyError::NotFound
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    let backtrace = std::backtrace::Backtrace::force_capture();
    error!(panic = message, %backtrace, "request handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

// ── Index and HTMX fragments ────────────────────────────────────────

async fn index(State(state): State<AppState>) -> Html<String> {
    let devices = pages::sorted(state.services.registry().get_all());
    Html(pages::index(&devices))
}

async fn htmx_devices(State(state): State<AppState>) -> Html<String> {
    let devices = pages::sorted(state.services.registry().get_all());
    Html(pages::device_rows(&devices))
}

async fn htmx_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, ProxyError> {
    let device = state.services.registry().get_by_any(&id).await?;
    Ok(Html(pages::device_card(&device)))
}

// ── Device proxy ────────────────────────────────────────────────────

async fn device_bare(Path(token): Path<String>) -> Redirect {
    Redirect::permanent(&format!("/devices/{token}/"))
}

async fn device_root(
    State(state): State<AppState>,
    Path(token): Path<String>,
    req: Request,
) -> Result<Response, ProxyError> {
    forward::forward(&state, &token, "", req).await
}

async fn device_path(
    State(state): State<AppState>,
    Path((token, rest)): Path<(String, String)>,
    req: Request,
) -> Result<Response, ProxyError> {
    forward::forward(&state, &token, &rest, req).await
}

// ── JSON-RPC ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcCall {
    method: String,
    #[serde(default)]
    params: Value,
}

fn rpc_error(err: &CoreError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({"error": {"code": err.rpc_code(), "message": err.to_string()}});
    (status, Json(body)).into_response()
}

async fn rpc(State(state): State<AppState>, call: Result<Json<RpcCall>, JsonRejection>) -> Response {
    let Json(call) = match call {
        Ok(call) => call,
        Err(rejection) => {
            return rpc_error(&CoreError::Protocol {
                message: rejection.body_text(),
            });
        }
    };
    match state.broker.call(&call.method, call.params).await {
        Ok(result) => Json(json!({"result": result})).into_response(),
        Err(e) => {
            debug!(method = %call.method, error = %e, "HTTP RPC failed");
            rpc_error(&e)
        }
    }
}

// ── Server-sent events ──────────────────────────────────────────────

fn sse_event(event: &RegistryEvent) -> Option<Event> {
    let data = match event {
        RegistryEvent::Upserted(device) => serde_json::to_string(device.as_ref()),
        RegistryEvent::Removed { id } => serde_json::to_string(&json!({"id": id})),
    };
    match data {
        Ok(data) => Some(Event::default().event(event.name()).data(data)),
        Err(e) => {
            debug!(error = %e, "unserializable registry event");
            None
        }
    }
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.services.registry().subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(frame) = sse_event(&event) {
                        yield Ok(frame);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "SSE subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Gen1 callbacks ──────────────────────────────────────────────────

/// Gen1 action URLs abbreviate some sensor names.
fn sensor_name(param: &str) -> &str {
    match param {
        "temp" => "temperature",
        "hum" => "humidity",
        other => other,
    }
}

async fn gen1_callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<&'static str, ProxyError> {
    let link = state.services.link();
    for (param, value) in &params {
        if param == "id" {
            continue;
        }
        if value.parse::<f32>().is_err() {
            debug!(device = %id, param, value, "skipping non-numeric Gen1 reading");
            continue;
        }
        let topic = gen1::sensor_topic(&id, sensor_name(param));
        link.publish(&topic, Bytes::from(value.clone()))
            .await
            .map_err(CoreError::from)?;
    }
    Ok("OK")
}
