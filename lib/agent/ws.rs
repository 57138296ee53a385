use std::time::Duration;

use tokio::net::UnixStream;
use tokio_tungstenite::{client_async, WebSocketStream};

use crate::{config::Config, vsock, HyperfleetError, HyperfleetResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Dial timeout for the vsock leg of a WebSocket upgrade.
const WS_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Opens a WebSocket to an agent endpoint (`/pty`, `/pty/sessions/<id>`,
/// `/watch/stream?...`) over the sandbox's vsock transport.
pub async fn dial_ws(
    cfg: &Config,
    sandbox_id: &str,
    path_and_query: &str,
) -> HyperfleetResult<WebSocketStream<UnixStream>> {
    let stream = vsock::dial(cfg, sandbox_id, vsock::GUEST_AGENT_PORT, WS_DIAL_TIMEOUT).await?;

    let url = format!("ws://{}{}", sandbox_id, path_and_query);
    let (ws, _response) = client_async(url.as_str(), stream).await.map_err(|e| {
        HyperfleetError::SandboxUnreachable(format!(
            "agent WebSocket upgrade on {} failed: {}",
            path_and_query, e
        ))
    })?;

    Ok(ws)
}
