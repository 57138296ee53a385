//! Registration, organization and API key endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    management,
    server::{ApiEnvelope, AppState, AuthContext},
    HyperfleetError, HyperfleetResult,
};

use super::ok_envelope;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const MAX_NAME_LENGTH: usize = 100;
const MAX_EMAIL_LENGTH: usize = 254;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Body for `POST /api/register`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Account email; validated and lowercased.
    pub email: String,

    /// Display name; derived from the email local part when absent.
    #[serde(default)]
    pub name: String,
}

/// Body for minting an API key.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateKeyRequest {
    /// Display name for the new key.
    pub key_name: String,
}

/// Body for toggling a key's active flag.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateKeyRequest {
    /// Desired active state.
    pub is_active: bool,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `POST /api/register` (unauthenticated)
///
/// Provisions a user, their default org, and the org's first API key. The
/// plaintext key appears only in this response.
pub async fn register(
    State(state): State<AppState>,
    Json(mut req): Json<RegisterRequest>,
) -> HyperfleetResult<Response> {
    req.email = req.email.trim().to_lowercase();
    if req.email.is_empty() {
        return Err(HyperfleetError::InvalidInput("email is required".to_string()));
    }
    if req.email.len() > MAX_EMAIL_LENGTH {
        return Err(HyperfleetError::InvalidInput(
            "email exceeds maximum length".to_string(),
        ));
    }
    if !is_plausible_email(&req.email) {
        return Err(HyperfleetError::InvalidInput(
            "invalid email format".to_string(),
        ));
    }

    if req.name.is_empty() {
        req.name = req
            .email
            .split('@')
            .next()
            .unwrap_or(&req.email)
            .to_string();
    }
    req.name = req.name.trim().to_string();
    if req.name.len() > MAX_NAME_LENGTH {
        return Err(HyperfleetError::InvalidInput(
            "name exceeds maximum length".to_string(),
        ));
    }

    let (user, org, key) = management::register(&state.pool, &req.email, &req.name).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::success(
            "provisioned",
            Some(json!({
                "user": { "id": user.id, "name": user.name, "email": user.email },
                "org": { "id": org.id, "name": org.name },
                "apiKey": key,
            })),
        )),
    )
        .into_response())
}

/// `GET /api/orgs/me`
pub async fn current_org(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> HyperfleetResult<Response> {
    let org = management::get_org(&state.pool, &auth.org_id).await?;
    Ok(ok_envelope(
        "organization retrieved",
        Some(serde_json::to_value(org)?),
    ))
}

/// `GET /api/orgs/{orgId}/apikeys`
pub async fn list_keys(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> HyperfleetResult<Response> {
    let keys: Vec<_> = management::list_keys_by_org(&state.pool, &org_id)
        .await?
        .iter()
        .map(|k| k.to_view())
        .collect();
    Ok(ok_envelope(
        "api keys retrieved",
        Some(serde_json::to_value(keys)?),
    ))
}

/// `POST /api/orgs/{orgId}/apikeys`
pub async fn generate_key(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<GenerateKeyRequest>,
) -> HyperfleetResult<Response> {
    if req.key_name.trim().is_empty() {
        return Err(HyperfleetError::InvalidInput(
            "keyName is required".to_string(),
        ));
    }

    let generated =
        management::generate_key(&state.pool, &org_id, &auth.key_id, req.key_name.trim()).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::success(
            "api key generated",
            Some(serde_json::to_value(generated)?),
        )),
    )
        .into_response())
}

/// `DELETE /api/orgs/{orgId}/apikeys/{keyId}`
pub async fn delete_key(
    State(state): State<AppState>,
    Path((_org_id, key_id)): Path<(String, String)>,
) -> HyperfleetResult<Response> {
    management::revoke_key(&state.pool, &key_id).await?;
    Ok(ok_envelope("api key revoked", None))
}

/// `POST /api/orgs/{orgId}/apikeys/{keyId}/activate`
pub async fn activate_key(
    State(state): State<AppState>,
    Path((_org_id, key_id)): Path<(String, String)>,
    Json(req): Json<ActivateKeyRequest>,
) -> HyperfleetResult<Response> {
    management::set_key_active(&state.pool, &key_id, req.is_active).await?;
    let message = if req.is_active {
        "api key activated"
    } else {
        "api key deactivated"
    };
    Ok(ok_envelope(message, None))
}

/// `PATCH /api/orgs/{orgId}/apikeys/{keyId}/touch`
pub async fn touch_key(
    State(state): State<AppState>,
    Path((_org_id, key_id)): Path<(String, String)>,
) -> HyperfleetResult<Response> {
    management::touch_key(&state.pool, &key_id).await?;
    Ok(ok_envelope("api key touched", None))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Cheap structural email check: one `@`, non-empty local part, and a
/// domain with a dot.
fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.len() >= 3
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_plausibility() {
        assert!(is_plausible_email("ada@example.com"));
        assert!(is_plausible_email("a.b+c@sub.example.org"));
        assert!(!is_plausible_email("not-an-email"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("ada@nodot"));
        assert!(!is_plausible_email("ada@.com"));
        assert!(!is_plausible_email("ada@com."));
    }
}
