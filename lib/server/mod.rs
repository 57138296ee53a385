//! REST and WebSocket surface.
//!
//! Handlers own the HTTP surface and nothing else: they resolve external
//! identifiers, delegate to the management services and the agent
//! transport, and normalize every outcome into the uniform
//! `{success, message, data?|error?}` envelope.

mod middleware;
mod relay;
mod routes;
mod state;
mod types;

pub mod handlers;

use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::HyperfleetError;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use middleware::*;
pub use relay::*;
pub use routes::*;
pub use state::*;
pub use types::*;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl IntoResponse for HyperfleetError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            HyperfleetError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            HyperfleetError::NotFound(_) | HyperfleetError::PathNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            HyperfleetError::Conflict(_) => StatusCode::CONFLICT,
            HyperfleetError::SandboxUnreachable(_)
            | HyperfleetError::VsockHandshakeRejected(_)
            | HyperfleetError::VmmApi { .. }
            | HyperfleetError::BootFailed(_)
            | HyperfleetError::Agent(_) => StatusCode::BAD_GATEWAY,
            HyperfleetError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HyperfleetError::NetworkSetup { .. }
            | HyperfleetError::CommandFailed { .. }
            | HyperfleetError::Io(_)
            | HyperfleetError::Db(_)
            | HyperfleetError::Json(_)
            | HyperfleetError::Custom(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (
            status,
            Json(ApiEnvelope::error("request failed", self.to_string())),
        )
            .into_response()
    }
}
