//! Command execution endpoints: one-shot exec, SSE exec streaming, and the
//! legacy JSON-over-stream session protocol.

use std::{collections::HashMap, time::Duration};

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
    Json,
};
use bytes::Bytes;
use futures::stream;
use hyper::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    agent,
    config::{DEFAULT_EXEC_TIMEOUT_SECS, MAX_ARGS_COUNT, MAX_COMMAND_LENGTH, MAX_EXEC_TIMEOUT_SECS},
    server::AppState,
    utils::parse_command,
    vsock, HyperfleetError, HyperfleetResult,
};

use super::{envelope_agent_response, ok_envelope, resolve_sandbox, stream_agent_response};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A one-shot or streaming exec request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    /// Command string; parsed shell-style when `args` is absent.
    pub command: String,

    /// Pre-split arguments; skips command-string parsing.
    #[serde(default)]
    pub args: Vec<String>,

    /// Timeout in seconds, clamped to the configured maximum.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Extra environment for the command.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory.
    #[serde(default)]
    pub cwd: String,
}

/// A legacy session-exec action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExecRequest {
    /// `create`, `exec`, `input`, `resize` or `close`.
    pub action: String,

    /// Session identifier; generated for `create` when omitted.
    #[serde(default, rename = "sessionId")]
    pub session_id: String,

    /// Command for `exec`.
    #[serde(default)]
    pub command: String,

    /// Raw input for `input`.
    #[serde(default)]
    pub input: String,

    /// Terminal columns for `resize`.
    #[serde(default)]
    pub cols: u16,

    /// Terminal rows for `resize`.
    #[serde(default)]
    pub rows: u16,
}

/// The agent's reply to a session action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExecResponse {
    /// Whether the action succeeded.
    pub success: bool,

    /// Captured output, if any.
    #[serde(default)]
    pub output: String,

    /// Error detail on failure.
    #[serde(default)]
    pub error: String,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `POST /api/sandboxes/{id}/exec`
pub async fn exec(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecRequest>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    let (command, timeout) = validate_exec_request(&req)?;

    let mut payload = json!({ "cmd": command, "timeout": timeout });
    if !req.env.is_empty() {
        payload["env"] = json!(req.env);
    }
    if !req.cwd.trim().is_empty() {
        payload["cwd"] = json!(req.cwd);
    }

    let resp = agent::get()?
        .request_json(Method::POST, &sandbox.id, "/exec", &payload)
        .await?;
    Ok(envelope_agent_response(resp).await)
}

/// `POST /api/sandboxes/{id}/exec-stream`
///
/// The agent emits SSE; the stream passes through untouched.
pub async fn exec_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecRequest>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    let (command, timeout) = validate_exec_request(&req)?;

    let mut payload = json!({ "cmd": command, "timeout": timeout });
    if !req.env.is_empty() {
        payload["env"] = json!(req.env);
    }
    if !req.cwd.trim().is_empty() {
        payload["cwd"] = json!(req.cwd);
    }

    let resp = agent::get()?
        .request_json(Method::POST, &sandbox.id, "/exec-stream", &payload)
        .await?;

    if resp.status().as_u16() >= 300 {
        return Ok(envelope_agent_response(resp).await);
    }
    Ok(stream_agent_response(resp))
}

/// `POST /api/sandboxes/{id}/session-exec`
pub async fn session_exec(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut req): Json<SessionExecRequest>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    validate_session_request(&mut req)?;

    let mut stream = vsock::dial(
        &state.cfg,
        &sandbox.id,
        vsock::GUEST_AGENT_PORT,
        Duration::from_secs(2),
    )
    .await?;

    let mut wire = serde_json::to_vec(&req)?;
    wire.push(b'\n');
    stream.write_all(&wire).await?;

    let mut raw = Vec::with_capacity(4096);
    let mut buf = [0u8; 4096];
    let reply: SessionExecResponse = loop {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .map_err(|_| HyperfleetError::Timeout("session action reply".to_string()))??;
        if n == 0 {
            return Err(HyperfleetError::Agent(
                "agent closed the session stream".to_string(),
            ));
        }
        raw.extend_from_slice(&buf[..n]);
        if let Ok(parsed) = serde_json::from_slice(&raw) {
            break parsed;
        }
    };

    if !reply.success {
        let detail = if reply.error.is_empty() {
            "session action failed".to_string()
        } else {
            reply.error.clone()
        };
        return Err(HyperfleetError::Agent(detail));
    }

    Ok(ok_envelope(
        "session action completed",
        Some(json!({ "sessionId": req.session_id, "output": reply.output })),
    ))
}

/// `POST /api/sandboxes/{id}/session-exec-stream`
///
/// Sends an `exec_stream` action and proxies the agent's NDJSON chunks to
/// the client as they arrive.
pub async fn session_exec_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SessionExecRequest>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;

    if req.session_id.trim().is_empty() {
        return Err(HyperfleetError::InvalidInput(
            "sessionId is required".to_string(),
        ));
    }
    if req.command.trim().is_empty() {
        return Err(HyperfleetError::InvalidInput(
            "command is required".to_string(),
        ));
    }

    let mut stream = vsock::dial(
        &state.cfg,
        &sandbox.id,
        vsock::GUEST_AGENT_PORT,
        Duration::from_secs(2),
    )
    .await?;

    let payload = json!({
        "action": "exec_stream",
        "sessionId": req.session_id,
        "command": req.command,
    });
    let mut wire = serde_json::to_vec(&payload)?;
    wire.push(b'\n');
    stream.write_all(&wire).await?;

    // No deadline past this point: the stream lives as long as the command.
    let body_stream = stream::unfold(stream, |mut stream| async move {
        let mut buf = vec![0u8; 4096];
        match stream.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), stream))
            }
            Err(e) => Some((Err(e), stream)),
        }
    });

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .map_err(HyperfleetError::custom)?;
    Ok(response)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Validates lengths and bounds, returning the effective command string and
/// timeout.
fn validate_exec_request(req: &ExecRequest) -> HyperfleetResult<(String, u64)> {
    if req.command.len() > MAX_COMMAND_LENGTH {
        return Err(HyperfleetError::InvalidInput("command too long".to_string()));
    }
    if req.args.len() > MAX_ARGS_COUNT {
        return Err(HyperfleetError::InvalidInput(
            "too many arguments".to_string(),
        ));
    }
    if req.command.trim().is_empty() {
        return Err(HyperfleetError::InvalidInput("empty command".to_string()));
    }

    // When args are absent the command must at least parse; unclosed quotes
    // are rejected here rather than in the guest shell.
    if req.args.is_empty() {
        let parts = parse_command(&req.command)?;
        if parts.is_empty() {
            return Err(HyperfleetError::InvalidInput("empty command".to_string()));
        }
        if parts.len() > MAX_ARGS_COUNT {
            return Err(HyperfleetError::InvalidInput(
                "too many arguments after parsing".to_string(),
            ));
        }
    }

    let timeout = match req.timeout {
        Some(0) | None => DEFAULT_EXEC_TIMEOUT_SECS,
        Some(t) => t.min(MAX_EXEC_TIMEOUT_SECS),
    };

    Ok((req.command.clone(), timeout))
}

fn validate_session_request(req: &mut SessionExecRequest) -> HyperfleetResult<()> {
    const ACTIONS: [&str; 5] = ["create", "exec", "input", "resize", "close"];
    if !ACTIONS.contains(&req.action.as_str()) {
        return Err(HyperfleetError::InvalidInput("invalid action".to_string()));
    }

    if req.action != "create" && req.session_id.trim().is_empty() {
        return Err(HyperfleetError::InvalidInput(format!(
            "sessionId is required for {}",
            req.action
        )));
    }

    if req.action == "exec" && req.command.trim().is_empty() {
        return Err(HyperfleetError::InvalidInput(
            "command is required for exec".to_string(),
        ));
    }

    if req.action == "resize" && (req.cols == 0 || req.rows == 0) {
        return Err(HyperfleetError::InvalidInput(
            "cols and rows are required for resize".to_string(),
        ));
    }

    if req.action == "create" && req.session_id.trim().is_empty() {
        let mut bytes = [0u8; 8];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        req.session_id = format!("sess-{}", hex);
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str) -> ExecRequest {
        ExecRequest {
            command: command.to_string(),
            args: Vec::new(),
            timeout: None,
            env: HashMap::new(),
            cwd: String::new(),
        }
    }

    #[test]
    fn test_exec_validation_bounds() {
        assert!(validate_exec_request(&request("ls -la")).is_ok());
        assert!(validate_exec_request(&request("")).is_err());
        assert!(validate_exec_request(&request(&"x".repeat(MAX_COMMAND_LENGTH + 1))).is_err());
        assert!(validate_exec_request(&request("echo 'unclosed")).is_err());
    }

    #[test]
    fn test_exec_timeout_clamping() {
        let mut req = request("true");
        assert_eq!(validate_exec_request(&req).unwrap().1, DEFAULT_EXEC_TIMEOUT_SECS);

        req.timeout = Some(10);
        assert_eq!(validate_exec_request(&req).unwrap().1, 10);

        req.timeout = Some(100_000);
        assert_eq!(validate_exec_request(&req).unwrap().1, MAX_EXEC_TIMEOUT_SECS);
    }

    #[test]
    fn test_session_validation_generates_create_id() {
        let mut req = SessionExecRequest {
            action: "create".into(),
            session_id: String::new(),
            command: String::new(),
            input: String::new(),
            cols: 0,
            rows: 0,
        };
        validate_session_request(&mut req).unwrap();
        assert!(req.session_id.starts_with("sess-"));
        assert_eq!(req.session_id.len(), "sess-".len() + 16);
    }

    #[test]
    fn test_session_validation_rejections() {
        let mut req = SessionExecRequest {
            action: "explode".into(),
            session_id: String::new(),
            command: String::new(),
            input: String::new(),
            cols: 0,
            rows: 0,
        };
        assert!(validate_session_request(&mut req).is_err());

        req.action = "exec".into();
        req.session_id = "sess-1".into();
        assert!(validate_session_request(&mut req).is_err()); // no command

        req.action = "resize".into();
        assert!(validate_session_request(&mut req).is_err()); // no dims

        req.cols = 80;
        req.rows = 24;
        assert!(validate_session_request(&mut req).is_ok());
    }
}
