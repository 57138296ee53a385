//! Sandbox lifecycle endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    lifecycle, management,
    management::{CreateSandboxRequest, RestoreSandboxRequest},
    server::{ApiEnvelope, AppState, AuthContext},
    HyperfleetResult,
};

use super::{ok_envelope, resolve_sandbox};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct PageParams {
    /// 1-based page number.
    #[serde(default)]
    pub page: Option<u32>,

    /// Requested page size, clamped server-side.
    #[serde(default, rename = "pageSize", alias = "page_size")]
    pub page_size: Option<u32>,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `GET /api/sandboxes`
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<PageParams>,
) -> HyperfleetResult<Response> {
    let page = management::list_sandboxes_by_org(
        &state.pool,
        &auth.org_id,
        params.page.unwrap_or(1),
        params.page_size.unwrap_or(0),
    )
    .await?;

    Ok(ok_envelope(
        "sandboxes retrieved",
        Some(json!({
            "sandboxes": page.sandboxes,
            "total": page.total,
            "page": params.page.unwrap_or(1),
            "pageSize": page.page_size,
        })),
    ))
}

/// `POST /api/sandboxes`
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateSandboxRequest>,
) -> HyperfleetResult<Response> {
    let sandbox =
        management::create_sandbox(&state.cfg, &state.pool, &auth.org_id, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::success(
            "sandbox created",
            Some(serde_json::to_value(&sandbox)?),
        )),
    )
        .into_response())
}

/// `POST /api/sandboxes/restore`
pub async fn restore(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<RestoreSandboxRequest>,
) -> HyperfleetResult<Response> {
    let sandbox =
        management::restore_sandbox(&state.cfg, &state.pool, &auth.org_id, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::success(
            "sandbox restored",
            Some(json!({ "id": sandbox.id, "ip": sandbox.ip })),
        )),
    )
        .into_response())
}

/// `GET /api/sandboxes/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    Ok(ok_envelope(
        "sandbox retrieved",
        Some(serde_json::to_value(&sandbox)?),
    ))
}

/// `DELETE /api/sandboxes/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    management::delete_sandbox(&state.cfg, &state.pool, &sandbox.id).await?;
    Ok(ok_envelope("sandbox deleted", None))
}

/// `POST /api/sandboxes/{id}/stop`
pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    lifecycle::stop(&state.cfg, &sandbox.id).await?;
    management::update_sandbox_status(&state.pool, &sandbox.id, "stopped").await?;
    Ok(ok_envelope("sandbox stopped", None))
}

/// `POST /api/sandboxes/{id}/pause`
pub async fn pause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    lifecycle::pause(&state.cfg, &sandbox.id).await?;
    management::update_sandbox_status(&state.pool, &sandbox.id, "paused").await?;
    Ok(ok_envelope("sandbox paused", None))
}

/// `POST /api/sandboxes/{id}/resume`
pub async fn resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    lifecycle::resume(&state.cfg, &sandbox.id).await?;
    management::update_sandbox_status(&state.pool, &sandbox.id, "running").await?;
    Ok(ok_envelope("sandbox resumed", None))
}

/// `GET /api/sandboxes/{id}/info`
pub async fn info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    let raw = lifecycle::info(&state.cfg, &sandbox.id).await?;
    let value = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
    Ok(ok_envelope("vm info", Some(value)))
}

/// `POST /api/sandboxes/{id}/snapshot`
pub async fn snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    let snapshot_id = lifecycle::create_snapshot(&state.cfg, &sandbox.id).await?;
    Ok(ok_envelope(
        "snapshot started",
        Some(json!({ "snapshotId": snapshot_id })),
    ))
}

/// `GET /api/sandboxes/{id}/snapshots`
pub async fn list_snapshots(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    let sandbox = resolve_sandbox(&state, &id).await?;
    let base = lifecycle::InstancePaths::new(&state.cfg, &sandbox.id).snapshots_dir();

    let snapshots: Vec<_> = lifecycle::list_snapshots(&state.cfg, &sandbox.id)
        .await?
        .into_iter()
        .map(|snapshot_id| {
            json!({
                "id": snapshot_id,
                "createdAt": snapshot_id,
                "fullPath": base.join(&snapshot_id).display().to_string(),
            })
        })
        .collect();

    Ok(ok_envelope("snapshots retrieved", Some(json!({ "snapshots": snapshots }))))
}
