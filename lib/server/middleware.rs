use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::{ApiEnvelope, AppState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Authentication context attached to every request that passed the API key
/// check.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The organization the presented key belongs to.
    pub org_id: String,

    /// The validated key id.
    pub key_id: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Rejects requests without a valid `X-API-Key` header.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(presented) = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return unauthorized("missing X-API-Key header");
    };

    match state.keys.validate(presented).await {
        Ok(key) => {
            req.extensions_mut().insert(AuthContext {
                org_id: key.org_id,
                key_id: key.id,
            });
            next.run(req).await
        }
        Err(_) => unauthorized("invalid API key"),
    }
}

fn unauthorized(detail: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiEnvelope::error("unauthorized", detail)),
    )
        .into_response()
}
