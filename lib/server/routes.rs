//! Route table and listener.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;

use crate::HyperfleetResult;

use super::{handlers, require_api_key, AppState};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the full application router.
///
/// Everything under `/api` except `/api/register` requires a valid
/// `X-API-Key`. The framework's default body cap is disabled: multipart
/// uploads enforce their own 5 MiB limit and raw binary uploads are
/// deliberately unbounded.
pub fn create_router(state: AppState) -> Router {
    let sandboxes = Router::new()
        .route(
            "/",
            get(handlers::sandboxes::list).post(handlers::sandboxes::create),
        )
        .route("/restore", post(handlers::sandboxes::restore))
        .route(
            "/{id}",
            get(handlers::sandboxes::get).delete(handlers::sandboxes::delete),
        )
        .route("/{id}/stop", post(handlers::sandboxes::stop))
        .route("/{id}/pause", post(handlers::sandboxes::pause))
        .route("/{id}/resume", post(handlers::sandboxes::resume))
        .route("/{id}/info", get(handlers::sandboxes::info))
        .route("/{id}/snapshot", post(handlers::sandboxes::snapshot))
        .route("/{id}/snapshots", get(handlers::sandboxes::list_snapshots))
        // Command execution
        .route("/{id}/exec", post(handlers::exec::exec))
        .route("/{id}/exec-stream", post(handlers::exec::exec_stream))
        .route("/{id}/session-exec", post(handlers::exec::session_exec))
        .route(
            "/{id}/session-exec-stream",
            post(handlers::exec::session_exec_stream),
        )
        // Process management
        .route("/{id}/commands/run", post(handlers::processes::run))
        .route("/{id}/commands/list", get(handlers::processes::list))
        .route("/{id}/commands/kill", post(handlers::processes::kill))
        .route("/{id}/commands/attach", post(handlers::processes::attach))
        .route("/{id}/commands/wait", post(handlers::processes::wait))
        // PTY
        .route("/{id}/pty", get(handlers::pty::proxy))
        .route(
            "/{id}/pty/sessions",
            get(handlers::pty::list_sessions).post(handlers::pty::create_session),
        )
        .route(
            "/{id}/pty/sessions/{sessionId}",
            get(handlers::pty::connect_session).delete(handlers::pty::delete_session),
        )
        .route(
            "/{id}/pty/sessions/{sessionId}/execute",
            post(handlers::pty::execute),
        )
        .route(
            "/{id}/pty/sessions/{sessionId}/buffer",
            get(handlers::pty::buffer),
        )
        .route(
            "/{id}/pty/sessions/{sessionId}/resize",
            post(handlers::pty::resize),
        )
        // Filesystem
        .route(
            "/{id}/files",
            get(handlers::fs::list).delete(handlers::fs::delete),
        )
        .route("/{id}/files/download", get(handlers::fs::download))
        .route("/{id}/files/upload", post(handlers::fs::upload))
        .route("/{id}/files/mkdir", post(handlers::fs::mkdir))
        .route("/{id}/files/create", post(handlers::fs::create))
        .route("/{id}/files/copy", post(handlers::fs::copy))
        .route("/{id}/files/move", post(handlers::fs::rename))
        .route("/{id}/files/stat", get(handlers::fs::stat))
        .route("/{id}/files/head-tail", get(handlers::fs::head_tail))
        .route("/{id}/files/chmod", post(handlers::fs::chmod))
        .route("/{id}/files/du", get(handlers::fs::disk_usage))
        .route("/{id}/files/search", get(handlers::fs::search))
        .route("/{id}/files/compress", post(handlers::fs::compress))
        .route("/{id}/files/extract", post(handlers::fs::extract))
        .route("/{id}/files/watch", post(handlers::fs::watch_start))
        .route(
            "/{id}/files/watch/{sessionId}/stream",
            get(handlers::fs::watch_stream),
        );

    let images = Router::new()
        .route(
            "/",
            get(handlers::images::list).post(handlers::images::create),
        )
        .route(
            "/{id}",
            get(handlers::images::get).delete(handlers::images::delete),
        )
        .route("/name/{name}", get(handlers::images::get_by_name));

    let orgs = Router::new()
        .route("/me", get(handlers::orgs::current_org))
        .route(
            "/{orgId}/apikeys",
            get(handlers::orgs::list_keys).post(handlers::orgs::generate_key),
        )
        .route("/{orgId}/apikeys/{keyId}", delete(handlers::orgs::delete_key))
        .route(
            "/{orgId}/apikeys/{keyId}/activate",
            post(handlers::orgs::activate_key),
        )
        .route(
            "/{orgId}/apikeys/{keyId}/touch",
            axum::routing::patch(handlers::orgs::touch_key),
        );

    let protected = Router::new()
        .nest("/sandboxes", sandboxes)
        .nest("/images", images)
        .nest("/orgs", orgs)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let api = Router::new()
        .route("/register", post(handlers::orgs::register))
        .merge(protected);

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Binds the configured listener and serves until shutdown.
pub async fn serve(state: AppState) -> HyperfleetResult<()> {
    let addr = state.cfg.get_server().address();
    let router = create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "hyperfleet server listening");
    axum::serve(listener, router).await?;

    Ok(())
}
