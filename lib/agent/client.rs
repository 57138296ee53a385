use std::{
    collections::HashMap,
    future::Future,
    path::PathBuf,
    pin::Pin,
    sync::OnceLock,
    task::{Context, Poll},
    time::Duration,
};

use axum::body::Body;
use hyper::{body::Incoming, Method, Request, Response, Uri};
use hyper_util::{
    client::legacy::Client,
    rt::{TokioExecutor, TokioIo},
};
use serde::Serialize;
use tokio::{net::UnixStream, time};

use crate::{config::Config, vsock, HyperfleetError, HyperfleetResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Per-sandbox cap on pooled idle connections.
const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Idle connections are retired after this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Dial timeout for the vsock handshake behind the pool.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Pacing of the agent readiness probe.
const READY_PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Per-attempt budget of the agent readiness probe.
const READY_PROBE_ATTEMPT: Duration = Duration::from_millis(100);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The process-wide HTTP client for guest agents.
///
/// Connection pools are only effective if they outlive requests, so there is
/// exactly one of these per process; see [`init`] and [`get`]. No overall
/// client timeout is imposed: large uploads and long-lived streams must not
/// be interrupted, and callers bound individual requests themselves.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client<VsockConnector, Body>,
}

/// Dialer that treats the URI host as a sandbox id and routes the
/// connection through that sandbox's vsock relay to the guest agent port.
#[derive(Debug, Clone)]
struct VsockConnector {
    instances_dir: PathBuf,
}

static AGENT_CLIENT: OnceLock<AgentClient> = OnceLock::new();

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes the shared agent client. Idempotent; the first call wins.
pub fn init(cfg: &Config) {
    let _ = AGENT_CLIENT.set(AgentClient::new(cfg));
}

/// Returns the shared agent client.
pub fn get() -> HyperfleetResult<&'static AgentClient> {
    AGENT_CLIENT.get().ok_or_else(|| {
        HyperfleetError::custom(anyhow::anyhow!("agent HTTP client not initialized"))
    })
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AgentClient {
    /// Builds a client with its own pool. Prefer [`init`]/[`get`] outside
    /// of tests.
    pub fn new(cfg: &Config) -> Self {
        let connector = VsockConnector {
            instances_dir: PathBuf::from(cfg.get_paths().get_instances_dir()),
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build(connector);

        Self { client }
    }

    /// Sends a bodyless request to an agent endpoint.
    pub async fn request(
        &self,
        method: Method,
        sandbox_id: &str,
        path_and_query: &str,
    ) -> HyperfleetResult<Response<Incoming>> {
        self.request_raw(method, sandbox_id, path_and_query, Body::empty(), None)
            .await
    }

    /// Sends a JSON payload to an agent endpoint.
    pub async fn request_json<T: Serialize>(
        &self,
        method: Method,
        sandbox_id: &str,
        path_and_query: &str,
        payload: &T,
    ) -> HyperfleetResult<Response<Incoming>> {
        let body = serde_json::to_vec(payload)?;
        self.request_raw(
            method,
            sandbox_id,
            path_and_query,
            Body::from(body),
            Some("application/json"),
        )
        .await
    }

    /// Sends an arbitrary (possibly streaming) body to an agent endpoint.
    pub async fn request_raw(
        &self,
        method: Method,
        sandbox_id: &str,
        path_and_query: &str,
        body: Body,
        content_type: Option<&str>,
    ) -> HyperfleetResult<Response<Incoming>> {
        let uri: Uri = format!("http://{}{}", sandbox_id, path_and_query)
            .parse()
            .map_err(|_| {
                HyperfleetError::InvalidInput(format!(
                    "bad agent request target: {}{}",
                    sandbox_id, path_and_query
                ))
            })?;

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Host", sandbox_id);
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        let req = builder.body(body).map_err(HyperfleetError::custom)?;

        self.client
            .request(req)
            .await
            .map_err(|e| HyperfleetError::SandboxUnreachable(format!("agent dial failed: {}", e)))
    }

    /// Polls the agent's root endpoint until it answers or the deadline
    /// elapses.
    ///
    /// Any HTTP response, whatever the status, means the agent is up; only
    /// transport failures mean "not ready yet".
    pub async fn wait_ready(&self, sandbox_id: &str, deadline: Duration) -> HyperfleetResult<()> {
        let start = time::Instant::now();
        loop {
            if start.elapsed() >= deadline {
                return Err(HyperfleetError::Timeout(format!(
                    "agent readiness on {} after {:?}",
                    sandbox_id, deadline
                )));
            }

            let attempt = self.request(Method::GET, sandbox_id, "/");
            if let Ok(Ok(_)) = time::timeout(READY_PROBE_ATTEMPT, attempt).await {
                tracing::debug!(sandbox = %sandbox_id, "agent ready");
                return Ok(());
            }

            time::sleep(READY_PROBE_INTERVAL).await;
        }
    }

    /// Pushes environment variables to the agent's `/env` endpoint.
    pub async fn set_env_vars(
        &self,
        sandbox_id: &str,
        env_vars: &HashMap<String, String>,
    ) -> HyperfleetResult<()> {
        if env_vars.is_empty() {
            return Ok(());
        }

        let resp = time::timeout(
            Duration::from_secs(5),
            self.request_json(Method::POST, sandbox_id, "/env", env_vars),
        )
        .await
        .map_err(|_| HyperfleetError::Timeout(format!("agent /env on {}", sandbox_id)))??;

        if resp.status().as_u16() != 200 {
            return Err(HyperfleetError::Agent(format!(
                "agent /env returned status {}",
                resp.status()
            )));
        }

        tracing::info!(sandbox = %sandbox_id, count = env_vars.len(), "environment variables set on agent");
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl tower::Service<Uri> for VsockConnector {
    type Response = TokioIo<UnixStream>;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let instances_dir = self.instances_dir.clone();
        Box::pin(async move {
            // The URI authority is "<sandbox-id>:<port>"; the port is
            // decorative, the agent always listens on the guest port.
            let sandbox_id = uri
                .host()
                .ok_or_else(|| std::io::Error::other("agent URI missing sandbox id host"))?
                .to_string();

            let socket_path = instances_dir.join(&sandbox_id).join("vsock.sock");
            let stream =
                vsock::dial_socket(&socket_path, vsock::GUEST_AGENT_PORT, DIAL_TIMEOUT)
                    .await
                    .map_err(std::io::Error::other)?;

            Ok(TokioIo::new(stream))
        })
    }
}
