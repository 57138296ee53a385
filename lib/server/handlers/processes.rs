//! Background process management, proxied to the agent.

use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use hyper::Method;
use serde::Deserialize;
use serde_json::json;

use crate::{agent, server::AppState, HyperfleetError, HyperfleetResult};

use super::{envelope_agent_response, resolve_sandbox, stream_agent_response};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A request to start a background process.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Command string.
    pub command: String,

    /// Extra environment.
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,

    /// Working directory.
    #[serde(default)]
    pub cwd: String,

    /// Timeout in seconds, zero means unbounded.
    #[serde(default)]
    pub timeout: u64,
}

/// A request targeting a process by PID.
#[derive(Debug, Deserialize)]
pub struct PidRequest {
    /// The process id inside the sandbox.
    pub pid: i64,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `POST /api/sandboxes/{id}/commands/run`
pub async fn run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RunRequest>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;

    let command = req.command.trim();
    if command.is_empty() {
        return Err(HyperfleetError::InvalidInput("command is required".to_string()));
    }

    let payload = json!({
        "command": command,
        "env": req.env,
        "cwd": req.cwd,
        "timeout": req.timeout,
    });
    let resp = agent::get()?
        .request_json(Method::POST, &sandbox.id, "/run", &payload)
        .await?;
    Ok(envelope_agent_response(resp).await)
}

/// `GET /api/sandboxes/{id}/commands/list`
pub async fn list(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    let resp = agent::get()?
        .request(Method::GET, &sandbox.id, "/processes")
        .await?;
    Ok(envelope_agent_response(resp).await)
}

/// `POST /api/sandboxes/{id}/commands/kill`
pub async fn kill(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PidRequest>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    validate_pid(req.pid)?;

    let resp = agent::get()?
        .request_json(Method::POST, &sandbox.id, "/kill", &json!({ "pid": req.pid }))
        .await?;
    Ok(envelope_agent_response(resp).await)
}

/// `POST /api/sandboxes/{id}/commands/attach`
///
/// The agent streams process output as SSE; passed through untouched.
pub async fn attach(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PidRequest>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    validate_pid(req.pid)?;

    let resp = agent::get()?
        .request_json(Method::POST, &sandbox.id, "/attach", &json!({ "pid": req.pid }))
        .await?;

    if resp.status().as_u16() >= 300 {
        return Ok(envelope_agent_response(resp).await);
    }
    Ok(stream_agent_response(resp))
}

/// `POST /api/sandboxes/{id}/commands/wait`
pub async fn wait(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PidRequest>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    validate_pid(req.pid)?;

    let resp = agent::get()?
        .request_json(Method::POST, &sandbox.id, "/wait", &json!({ "pid": req.pid }))
        .await?;
    Ok(envelope_agent_response(resp).await)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn validate_pid(pid: i64) -> HyperfleetResult<()> {
    if pid <= 0 {
        return Err(HyperfleetError::InvalidInput("invalid PID".to_string()));
    }
    Ok(())
}
