//! Interactive PTY endpoints: the ephemeral WebSocket proxy and persistent
//! session management, all backed by agent HTTP/WS endpoints.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::BodyExt;
use hyper::Method;
use serde::Deserialize;
use serde_json::json;

use crate::{
    agent,
    server::{relay, AppState},
    HyperfleetError, HyperfleetResult,
};

use super::{ok_envelope, resolve_sandbox};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Body for executing a command in a session.
#[derive(Debug, Deserialize)]
pub struct SessionCommandRequest {
    /// Command line written to the PTY.
    pub command: String,
}

/// Body for resizing a session terminal.
#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    /// Terminal rows.
    pub rows: u16,

    /// Terminal columns.
    pub cols: u16,
}

#[derive(Debug, Deserialize)]
struct AgentSessionReply {
    success: bool,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct AgentSessionInfo {
    id: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    clients: i64,
    #[serde(default)]
    alive: bool,
}

#[derive(Debug, Deserialize)]
struct AgentSessionList {
    success: bool,
    #[serde(default)]
    sessions: Vec<AgentSessionInfo>,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `GET /api/sandboxes/{id}/pty`
///
/// Ephemeral PTY: upgrades the caller and relays the agent's `/pty`
/// WebSocket.
pub async fn proxy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    relay_upgrade(state, id, "/pty".to_string(), ws).await
}

/// `GET /api/sandboxes/{id}/pty/sessions/{sessionId}`
///
/// Attaches the caller to a persistent PTY session.
pub async fn connect_session(
    State(state): State<AppState>,
    Path((id, session_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    relay_upgrade(state, id, format!("/pty/sessions/{}", session_id), ws).await
}

/// `POST /api/sandboxes/{id}/pty/sessions`
pub async fn create_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    let client = agent::get()?;

    let reply: AgentSessionReply =
        agent_json(client, &sandbox.id, Method::POST, "/pty/sessions").await?;
    if !reply.success {
        return Err(HyperfleetError::Agent(
            "agent reported failure creating PTY session".to_string(),
        ));
    }

    // Some agent builds return an empty id from create; recover it from the
    // sessions list (newest last).
    let (session_id, created_at) = if reply.session_id.is_empty() {
        let list: AgentSessionList =
            agent_json(client, &sandbox.id, Method::GET, "/pty/sessions").await?;
        let last = list
            .sessions
            .last()
            .ok_or_else(|| HyperfleetError::Agent("session created but not found".to_string()))?;
        (last.id.clone(), last.created_at.clone())
    } else {
        (reply.session_id, reply.created_at)
    };

    Ok(ok_envelope(
        "session created",
        Some(json!({ "sessionId": session_id, "createdAt": created_at })),
    ))
}

/// `GET /api/sandboxes/{id}/pty/sessions`
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;

    let list: AgentSessionList =
        agent_json(agent::get()?, &sandbox.id, Method::GET, "/pty/sessions").await?;
    if !list.success {
        return Err(HyperfleetError::Agent(
            "agent reported failure listing PTY sessions".to_string(),
        ));
    }

    let sessions: Vec<_> = list
        .sessions
        .into_iter()
        .map(|s| {
            json!({
                "id": s.id,
                "createdAt": s.created_at,
                "clients": s.clients,
                "alive": s.alive,
            })
        })
        .collect();

    Ok(ok_envelope(
        "sessions retrieved",
        Some(json!({ "sessions": sessions })),
    ))
}

/// `DELETE /api/sandboxes/{id}/pty/sessions/{sessionId}`
pub async fn delete_session(
    State(state): State<AppState>,
    Path((id, session_id)): Path<(String, String)>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;

    let resp = agent::get()?
        .request(
            Method::DELETE,
            &sandbox.id,
            &format!("/pty/sessions/{}", session_id),
        )
        .await?;
    expect_ok(resp).await?;

    Ok(ok_envelope("session deleted", None))
}

/// `POST /api/sandboxes/{id}/pty/sessions/{sessionId}/execute`
pub async fn execute(
    State(state): State<AppState>,
    Path((id, session_id)): Path<(String, String)>,
    Json(req): Json<SessionCommandRequest>,
) -> HyperfleetResult<Response> {
    if req.command.is_empty() {
        return Err(HyperfleetError::InvalidInput(
            "command is required".to_string(),
        ));
    }
    let sandbox = resolve_sandbox(&state, &id).await?;

    let resp = agent::get()?
        .request_json(
            Method::POST,
            &sandbox.id,
            &format!("/pty/sessions/{}/execute", session_id),
            &json!({ "command": req.command }),
        )
        .await?;
    expect_ok(resp).await?;

    Ok(ok_envelope("command sent", None))
}

/// `GET /api/sandboxes/{id}/pty/sessions/{sessionId}/buffer`
pub async fn buffer(
    State(state): State<AppState>,
    Path((id, session_id)): Path<(String, String)>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;

    #[derive(Deserialize)]
    struct BufferReply {
        #[allow(dead_code)]
        success: bool,
        #[serde(default)]
        output: String,
    }

    let reply: BufferReply = agent_json(
        agent::get()?,
        &sandbox.id,
        Method::GET,
        &format!("/pty/sessions/{}/buffer", session_id),
    )
    .await?;

    Ok(ok_envelope(
        "buffer retrieved",
        Some(json!({ "output": reply.output })),
    ))
}

/// `POST /api/sandboxes/{id}/pty/sessions/{sessionId}/resize`
pub async fn resize(
    State(state): State<AppState>,
    Path((id, session_id)): Path<(String, String)>,
    Json(req): Json<ResizeRequest>,
) -> HyperfleetResult<Response> {
    if req.rows == 0 || req.cols == 0 {
        return Err(HyperfleetError::InvalidInput(
            "rows and cols are required".to_string(),
        ));
    }
    let sandbox = resolve_sandbox(&state, &id).await?;

    let resp = agent::get()?
        .request_json(
            Method::POST,
            &sandbox.id,
            &format!("/pty/sessions/{}/resize", session_id),
            &json!({ "rows": req.rows, "cols": req.cols }),
        )
        .await?;
    expect_ok(resp).await?;

    Ok(ok_envelope("terminal resized", None))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Resolves a sandbox, upgrades the caller, and relays an agent WS target.
async fn relay_upgrade(
    state: AppState,
    id: String,
    target: String,
    ws: WebSocketUpgrade,
) -> Response {
    let sandbox = match resolve_sandbox(&state, &id).await {
        Ok(sandbox) => sandbox,
        Err(e) => return e.into_response(),
    };

    let cfg = state.cfg.clone();
    ws.on_upgrade(move |client_socket| async move {
        match agent::dial_ws(&cfg, &sandbox.id, &target).await {
            Ok(agent_ws) => relay(client_socket, agent_ws).await,
            Err(e) => {
                tracing::warn!(sandbox = %sandbox.id, target = %target, error = %e, "agent WS dial failed");
            }
        }
    })
}

/// Sends a request and decodes a JSON agent reply, treating non-200 as an
/// agent fault.
async fn agent_json<T: serde::de::DeserializeOwned>(
    client: &agent::AgentClient,
    sandbox_id: &str,
    method: Method,
    path: &str,
) -> HyperfleetResult<T> {
    let resp = client.request(method, sandbox_id, path).await?;
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| HyperfleetError::Agent(e.to_string()))?
        .to_bytes();

    if status.as_u16() != 200 {
        return Err(HyperfleetError::Agent(format!(
            "agent returned {}: {}",
            status,
            String::from_utf8_lossy(&bytes)
        )));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| HyperfleetError::Agent(format!("failed to decode agent response: {}", e)))
}

/// Discards a response body, failing on non-200.
async fn expect_ok(resp: hyper::Response<hyper::body::Incoming>) -> HyperfleetResult<()> {
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| HyperfleetError::Agent(e.to_string()))?
        .to_bytes();

    if status.as_u16() != 200 {
        return Err(HyperfleetError::Agent(format!(
            "agent returned {}: {}",
            status,
            String::from_utf8_lossy(&bytes)
        )));
    }
    Ok(())
}
