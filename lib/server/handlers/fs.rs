//! Guest filesystem endpoints.
//!
//! A few operations hit native agent endpoints; the rest are shelled-out
//! guest commands built by [`crate::agent::fsops`] with strict single-quote
//! interpolation. Uploads accept both multipart form-data (capped at 5 MiB)
//! and raw binary bodies (uncapped, streamed).

use axum::{
    body::Body,
    extract::{FromRequest, Multipart, Path, Query, Request, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::Limited;
use serde::Deserialize;
use serde_json::json;

use crate::{
    agent::{self, fsops},
    server::{relay, ApiEnvelope, AppState},
    HyperfleetError, HyperfleetResult,
};

use super::{envelope_agent_response, ok_envelope, resolve_sandbox, stream_agent_response};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Longest accepted guest path.
const MAX_PATH_LENGTH: usize = 4096;

/// Longest accepted search pattern.
const MAX_PATTERN_LENGTH: usize = 1024;

/// Longest accepted chmod mode string.
const MAX_MODE_LENGTH: usize = 10;

/// Multipart uploads beyond this are refused; raw binary uploads have no
/// cap.
const MAX_MULTIPART_BYTES: usize = 5 * 1024 * 1024;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// `?path=` query parameter.
#[derive(Debug, Deserialize)]
pub struct PathParam {
    /// Guest path.
    #[serde(default)]
    pub path: Option<String>,
}

/// `?from=&to=` query parameters.
#[derive(Debug, Deserialize)]
pub struct FromToParams {
    /// Source guest path.
    pub from: String,

    /// Destination guest path.
    pub to: String,
}

/// `?path=&lines=&head=` query parameters.
#[derive(Debug, Deserialize)]
pub struct HeadTailParams {
    /// Guest path.
    pub path: String,

    /// Line count, defaults to 10.
    #[serde(default)]
    pub lines: Option<u32>,

    /// Head (true, default) or tail (false).
    #[serde(default)]
    pub head: Option<bool>,
}

/// `?path=&mode=` query parameters.
#[derive(Debug, Deserialize)]
pub struct ChmodParams {
    /// Guest path.
    pub path: String,

    /// Mode string handed to chmod.
    pub mode: String,
}

/// `?path=&pattern=` query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Directory to search under, defaults to /root.
    #[serde(default)]
    pub path: Option<String>,

    /// Filename substring pattern.
    pub pattern: String,
}

/// `?path=&format=` query parameters.
#[derive(Debug, Deserialize)]
pub struct CompressParams {
    /// Guest path to archive.
    pub path: String,

    /// `tar`, `tar.gz` or `zip`.
    pub format: String,
}

/// `?archive=&dest=` query parameters.
#[derive(Debug, Deserialize)]
pub struct ExtractParams {
    /// Archive path.
    pub archive: String,

    /// Destination directory; defaults to the archive's directory.
    #[serde(default)]
    pub dest: Option<String>,
}

/// Body for starting a filesystem watch.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    /// Directory to watch.
    pub path: String,

    /// Recurse into subdirectories.
    #[serde(default)]
    pub recursive: bool,

    /// Skip dotfiles (default true).
    #[serde(default)]
    pub ignore_hidden: Option<bool>,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `GET /api/sandboxes/{id}/files`
pub async fn list(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PathParam>,
) -> HyperfleetResult<Response> {
    let path = params.path.unwrap_or_else(|| "/root".to_string());
    validate_path(&path)?;

    let sandbox = resolve_sandbox(&state, &id).await?;
    let resp = fsops::list_files(agent::get()?, &sandbox.id, &path).await?;
    Ok(envelope_agent_response(resp).await)
}

/// `GET /api/sandboxes/{id}/files/download`
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PathParam>,
) -> HyperfleetResult<Response> {
    let path = required_path(params)?;
    let sandbox = resolve_sandbox(&state, &id).await?;

    let resp = fsops::download_file(agent::get()?, &sandbox.id, &path).await?;
    if resp.status().as_u16() != 200 {
        return Ok(stream_agent_response(resp));
    }

    let (parts, body) = resp.into_parts();
    let filename = sanitize_filename(
        std::path::Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string()),
    );

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        );
    if let Some(length) = parts.headers.get(header::CONTENT_LENGTH) {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    builder
        .body(Body::new(body))
        .map_err(HyperfleetError::custom)
}

/// `POST /api/sandboxes/{id}/files/upload`
pub async fn upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PathParam>,
    req: Request,
) -> HyperfleetResult<Response> {
    let path = required_path(params)?;
    let sandbox = resolve_sandbox(&state, &id).await?;
    let client = agent::get()?;

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let (parts, body) = req.into_parts();
        let limited = Body::new(Limited::new(body, MAX_MULTIPART_BYTES));
        let req = Request::from_parts(parts, limited);

        let mut multipart = match Multipart::from_request(req, &()).await {
            Ok(multipart) => multipart,
            Err(e) => return Ok(multipart_error(e.to_string())),
        };

        loop {
            match multipart.next_field().await {
                Ok(Some(field)) if field.name() == Some("file") => {
                    let field_type = field.content_type().map(str::to_string);
                    let data = match field.bytes().await {
                        Ok(data) => data,
                        Err(e) => return Ok(multipart_error(e.to_string())),
                    };
                    tracing::debug!(sandbox = %sandbox.id, size = data.len(), "multipart upload");

                    let resp = fsops::upload_file(
                        client,
                        &sandbox.id,
                        &path,
                        Body::from(data),
                        field_type.as_deref(),
                    )
                    .await?;
                    return Ok(stream_agent_response(resp));
                }
                Ok(Some(_)) => continue,
                Ok(None) => {
                    return Err(HyperfleetError::InvalidInput(
                        "no file found in multipart upload, expected field name 'file'"
                            .to_string(),
                    ))
                }
                Err(e) => return Ok(multipart_error(e.to_string())),
            }
        }
    }

    // Raw binary: stream the request body straight through to the agent.
    tracing::debug!(sandbox = %sandbox.id, path = %path, "binary upload");
    let body = req.into_body();
    let content_type = if content_type.is_empty() {
        None
    } else {
        Some(content_type.as_str())
    };
    let resp = fsops::upload_file(client, &sandbox.id, &path, body, content_type).await?;
    Ok(stream_agent_response(resp))
}

/// `DELETE /api/sandboxes/{id}/files`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PathParam>,
) -> HyperfleetResult<Response> {
    let path = required_path(params)?;
    shelled(&state, &id, fsops::remove_cmd(&path)).await
}

/// `POST /api/sandboxes/{id}/files/mkdir`
pub async fn mkdir(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PathParam>,
) -> HyperfleetResult<Response> {
    let path = required_path(params)?;
    shelled(&state, &id, fsops::mkdir_cmd(&path)).await
}

/// `POST /api/sandboxes/{id}/files/create`
pub async fn create(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PathParam>,
) -> HyperfleetResult<Response> {
    let path = required_path(params)?;
    shelled(&state, &id, fsops::create_file_cmd(&path)).await
}

/// `POST /api/sandboxes/{id}/files/move`
pub async fn rename(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FromToParams>,
) -> HyperfleetResult<Response> {
    validate_path(&params.from)?;
    validate_path(&params.to)?;
    shelled(&state, &id, fsops::move_cmd(&params.from, &params.to)).await
}

/// `POST /api/sandboxes/{id}/files/copy`
pub async fn copy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FromToParams>,
) -> HyperfleetResult<Response> {
    validate_path(&params.from)?;
    validate_path(&params.to)?;
    shelled(&state, &id, fsops::copy_cmd(&params.from, &params.to)).await
}

/// `GET /api/sandboxes/{id}/files/stat`
pub async fn stat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PathParam>,
) -> HyperfleetResult<Response> {
    let path = required_path(params)?;
    shelled(&state, &id, fsops::stat_cmd(&path)).await
}

/// `GET /api/sandboxes/{id}/files/head-tail`
pub async fn head_tail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HeadTailParams>,
) -> HyperfleetResult<Response> {
    validate_path(&params.path)?;
    let cmd = fsops::head_tail_cmd(
        &params.path,
        params.lines.unwrap_or(10),
        params.head.unwrap_or(true),
    );
    shelled(&state, &id, cmd).await
}

/// `POST /api/sandboxes/{id}/files/chmod`
pub async fn chmod(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ChmodParams>,
) -> HyperfleetResult<Response> {
    validate_path(&params.path)?;
    if params.mode.is_empty() || params.mode.len() > MAX_MODE_LENGTH {
        return Err(HyperfleetError::InvalidInput(
            "mode is required and bounded".to_string(),
        ));
    }
    shelled(&state, &id, fsops::chmod_cmd(&params.path, &params.mode)).await
}

/// `GET /api/sandboxes/{id}/files/du`
pub async fn disk_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PathParam>,
) -> HyperfleetResult<Response> {
    let path = params.path.unwrap_or_else(|| "/root".to_string());
    validate_path(&path)?;
    shelled(&state, &id, fsops::du_cmd(&path)).await
}

/// `GET /api/sandboxes/{id}/files/search`
pub async fn search(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SearchParams>,
) -> HyperfleetResult<Response> {
    let path = params.path.unwrap_or_else(|| "/root".to_string());
    validate_path(&path)?;
    if params.pattern.is_empty() || params.pattern.len() > MAX_PATTERN_LENGTH {
        return Err(HyperfleetError::InvalidInput(
            "pattern is required and bounded".to_string(),
        ));
    }
    shelled(&state, &id, fsops::search_cmd(&path, &params.pattern)).await
}

/// `POST /api/sandboxes/{id}/files/compress`
pub async fn compress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CompressParams>,
) -> HyperfleetResult<Response> {
    validate_path(&params.path)?;
    let cmd = fsops::compress_cmd(&params.path, &params.format)?;
    shelled(&state, &id, cmd).await
}

/// `POST /api/sandboxes/{id}/files/extract`
pub async fn extract(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ExtractParams>,
) -> HyperfleetResult<Response> {
    validate_path(&params.archive)?;
    let dest = params.dest.unwrap_or_else(|| {
        std::path::Path::new(&params.archive)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "/".to_string())
    });
    let cmd = fsops::extract_cmd(&params.archive, &dest)?;
    shelled(&state, &id, cmd).await
}

/// `POST /api/sandboxes/{id}/files/watch`
pub async fn watch_start(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<WatchRequest>,
) -> HyperfleetResult<Response> {
    validate_path(&req.path)?;
    let sandbox = resolve_sandbox(&state, &id).await?;

    let resp = fsops::start_watch(
        agent::get()?,
        &sandbox.id,
        &req.path,
        req.recursive,
        req.ignore_hidden.unwrap_or(true),
    )
    .await?;

    #[derive(Deserialize)]
    struct AgentWatchReply {
        success: bool,
        #[serde(default)]
        error: String,
        #[serde(default, rename = "sessionId")]
        session_id: String,
    }

    let bytes = http_body_util::BodyExt::collect(resp.into_body())
        .await
        .map_err(|e| HyperfleetError::Agent(format!("invalid sandbox response: {}", e)))?
        .to_bytes();
    let reply: AgentWatchReply = serde_json::from_slice(&bytes)
        .map_err(|e| HyperfleetError::Agent(format!("invalid sandbox response: {}", e)))?;

    if !reply.success {
        return Err(HyperfleetError::Agent(reply.error));
    }
    if reply.session_id.is_empty() {
        return Err(HyperfleetError::Agent("missing sessionId".to_string()));
    }

    Ok(ok_envelope(
        "watch started",
        Some(json!({ "sessionId": reply.session_id })),
    ))
}

/// `GET /api/sandboxes/{id}/files/watch/{sessionId}/stream`
///
/// Upgrades the caller and relays the agent's watch event stream.
pub async fn watch_stream(
    State(state): State<AppState>,
    Path((id, session_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    let sandbox = match resolve_sandbox(&state, &id).await {
        Ok(sandbox) => sandbox,
        Err(e) => return e.into_response(),
    };

    let cfg = state.cfg.clone();
    ws.on_upgrade(move |client_socket| async move {
        let target = format!("/watch/stream?sessionId={}", session_id);
        match agent::dial_ws(&cfg, &sandbox.id, &target).await {
            Ok(agent_ws) => relay(client_socket, agent_ws).await,
            Err(e) => {
                tracing::warn!(sandbox = %sandbox.id, error = %e, "watch stream dial failed");
                let mut client_socket = client_socket;
                let _ = client_socket
                    .send(axum::extract::ws::Message::Text(
                        json!({ "error": "failed to connect to watch session" })
                            .to_string()
                            .into(),
                    ))
                    .await;
            }
        }
    })
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Runs a built guest command through the agent and envelopes the result.
async fn shelled(state: &AppState, id: &str, cmd: String) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(state, id).await?;
    let resp = fsops::exec_shell(agent::get()?, &sandbox.id, &cmd).await?;
    Ok(envelope_agent_response(resp).await)
}

fn required_path(params: PathParam) -> HyperfleetResult<String> {
    let path = params
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| HyperfleetError::InvalidInput("path is required".to_string()))?;
    validate_path(&path)?;
    Ok(path)
}

fn validate_path(path: &str) -> HyperfleetResult<()> {
    if path.is_empty() {
        return Err(HyperfleetError::InvalidInput("path is required".to_string()));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(HyperfleetError::InvalidInput(
            "path exceeds maximum length".to_string(),
        ));
    }
    if path.contains('\0') {
        return Err(HyperfleetError::InvalidInput(
            "path contains null bytes".to_string(),
        ));
    }
    Ok(())
}

/// Strips separators and quotes so a filename is safe inside a
/// Content-Disposition header.
fn sanitize_filename(name: String) -> String {
    name.chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\0'))
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// Maps a multipart read failure: overruns of the 5 MiB cap become 413,
/// anything else 400.
fn multipart_error(detail: String) -> Response {
    if detail.to_lowercase().contains("length limit") {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ApiEnvelope::error(
                "file too large, maximum 5MB for multipart uploads; use binary upload for larger files",
                detail,
            )),
        )
            .into_response();
    }
    (
        StatusCode::BAD_REQUEST,
        Json(ApiEnvelope::error("invalid multipart upload", detail)),
    )
        .into_response()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path_bounds() {
        assert!(validate_path("/root").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path(&"x".repeat(MAX_PATH_LENGTH + 1)).is_err());
        assert!(validate_path("/tmp/\0bad").is_err());
    }

    #[test]
    fn test_sanitize_filename_strips_header_hazards() {
        assert_eq!(sanitize_filename("report.pdf".into()), "report.pdf");
        assert_eq!(sanitize_filename("a/b\\c.txt".into()), "a_b_c.txt");
        assert_eq!(sanitize_filename("we\"ird'name".into()), "weirdname");
    }

    #[test]
    fn test_multipart_error_distinguishes_overflow() {
        let resp = multipart_error("length limit exceeded".into());
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let resp = multipart_error("bad boundary".into());
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
