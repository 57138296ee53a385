//! Base image metadata endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};

use crate::{
    management::{self, Image},
    server::{ApiEnvelope, AppState, AuthContext},
    utils::is_valid_id,
    HyperfleetError, HyperfleetResult,
};

use super::ok_envelope;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const MAX_IMAGE_NAME_LENGTH: usize = 100;
const MAX_IMAGE_TAG_LENGTH: usize = 50;

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `GET /api/images`
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> HyperfleetResult<Response> {
    let images = management::list_images(&state.pool, &auth.org_id).await?;
    Ok(ok_envelope(
        "images retrieved",
        Some(serde_json::to_value(images)?),
    ))
}

/// `GET /api/images/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    validate_image_id(&id)?;
    let image = management::get_image(&state.pool, &id).await?;
    Ok(ok_envelope(
        "image retrieved",
        Some(serde_json::to_value(image)?),
    ))
}

/// `GET /api/images/name/{name}`
pub async fn get_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> HyperfleetResult<Response> {
    if name.is_empty() || name.len() > MAX_IMAGE_NAME_LENGTH {
        return Err(HyperfleetError::InvalidInput(
            "image name is required and bounded".to_string(),
        ));
    }
    let image = management::get_latest_image_by_name(&state.pool, &name).await?;
    Ok(ok_envelope(
        "image retrieved",
        Some(serde_json::to_value(image)?),
    ))
}

/// `POST /api/images`
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(mut image): Json<Image>,
) -> HyperfleetResult<Response> {
    image.name = image.name.trim().to_string();
    image.tag = image.tag.trim().to_string();

    if image.name.is_empty() {
        return Err(HyperfleetError::InvalidInput(
            "image name is required".to_string(),
        ));
    }
    if image.name.len() > MAX_IMAGE_NAME_LENGTH {
        return Err(HyperfleetError::InvalidInput(
            "image name exceeds maximum length".to_string(),
        ));
    }
    if image.tag.len() > MAX_IMAGE_TAG_LENGTH {
        return Err(HyperfleetError::InvalidInput(
            "image tag exceeds maximum length".to_string(),
        ));
    }

    // Callers cannot create images on behalf of other orgs.
    image.org_id = auth.org_id.clone();
    image.system = false;

    let created = management::create_image(&state.pool, image).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::success(
            "image created",
            Some(serde_json::to_value(created)?),
        )),
    )
        .into_response())
}

/// `DELETE /api/images/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HyperfleetResult<Response> {
    validate_image_id(&id)?;
    management::delete_image(&state.pool, &id).await?;
    Ok(ok_envelope("image deleted", None))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn validate_image_id(id: &str) -> HyperfleetResult<()> {
    if !is_valid_id(id) {
        return Err(HyperfleetError::InvalidInput(format!(
            "invalid image id format: {}",
            id
        )));
    }
    Ok(())
}
