//! Request handlers, grouped by surface.

pub mod exec;
pub mod fs;
pub mod images;
pub mod orgs;
pub mod processes;
pub mod pty;
pub mod sandboxes;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use serde_json::Value;

use crate::{
    management::{self, Sandbox},
    utils::is_valid_id,
    HyperfleetError, HyperfleetResult,
};

use super::{ApiEnvelope, AppState};

//--------------------------------------------------------------------------------------------------
// Functions: Shared helpers
//--------------------------------------------------------------------------------------------------

/// Resolves an externally supplied sandbox id to its record.
pub(crate) async fn resolve_sandbox(
    state: &AppState,
    sandbox_id: &str,
) -> HyperfleetResult<Sandbox> {
    if !is_valid_id(sandbox_id) {
        return Err(HyperfleetError::InvalidInput(format!(
            "malformed sandbox id: {}",
            sandbox_id
        )));
    }
    management::get_sandbox(&state.pool, sandbox_id).await
}

/// Normalizes an agent response into the JSON envelope.
///
/// JSON bodies are passed through verbatim inside the envelope with the
/// original status; other bodies are trimmed and wrapped. A status of 400
/// or above is always surfaced as an error regardless of content.
pub(crate) async fn envelope_agent_response(resp: hyper::Response<Incoming>) -> Response {
    let status = resp.status();
    let is_json = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);

    let bytes = match resp.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(ApiEnvelope::error(
                    "failed to read sandbox response",
                    e.to_string(),
                )),
            )
                .into_response()
        }
    };

    if is_json {
        if status.as_u16() >= 400 {
            let detail = String::from_utf8_lossy(&bytes).into_owned();
            return (status, Json(ApiEnvelope::error("sandbox error", detail))).into_response();
        }
        let raw: Value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        return (status, Json(ApiEnvelope::success("ok", Some(raw)))).into_response();
    }

    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    if status.as_u16() >= 400 {
        return (status, Json(ApiEnvelope::error("sandbox error", text))).into_response();
    }
    (status, Json(ApiEnvelope::success(text, None))).into_response()
}

/// Streams an agent response straight through: status, content headers and
/// body, untouched. Used for downloads and SSE streams.
pub(crate) fn stream_agent_response(resp: hyper::Response<Incoming>) -> Response {
    let (parts, body) = resp.into_parts();

    let mut builder = Response::builder().status(parts.status);
    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_LENGTH,
        header::CACHE_CONTROL,
    ] {
        if let Some(value) = parts.headers.get(&name) {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Body::new(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// A bare success envelope response.
pub(crate) fn ok_envelope(message: &str, data: Option<Value>) -> Response {
    Json(ApiEnvelope::success(message, data)).into_response()
}
