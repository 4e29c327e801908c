// ── Proxy error types ──
//
// Anything a handler can fail with. Each variant knows its HTTP status;
// the body is the display text as `text/plain`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use myhome_core::CoreError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no device for token '{token}'")]
    UnknownDevice { token: String },

    #[error("not found")]
    NotFound,

    #[error("backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("proxy startup failed: {0}")]
    Startup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub(crate) fn backend(backend: &str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            backend: backend.to_owned(),
            message: err.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownDevice { .. } | Self::NotFound => StatusCode::NOT_FOUND,
            Self::Backend { .. } => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Core(e) => {
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Startup(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "proxy request failed");
        }
        (status, self.to_string()).into_response()
    }
}
