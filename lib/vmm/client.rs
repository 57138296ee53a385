use std::{
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Uri};
use hyper_util::{
    client::legacy::Client,
    rt::{TokioExecutor, TokioIo},
};
use serde::Serialize;
use tokio::{net::UnixStream, time};

use crate::{HyperfleetError, HyperfleetResult};

use super::VmInfo;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Pacing of the socket readiness poll loop.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(2);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// HTTP client for one VMM control socket.
#[derive(Debug, Clone)]
pub struct VmmClient {
    socket_path: PathBuf,
    client: Client<UnixConnector, Full<Bytes>>,
}

/// A connector that routes every request to a fixed Unix domain socket,
/// regardless of the URI's host/port.
#[derive(Debug, Clone)]
struct UnixConnector {
    socket_path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VmmClient {
    /// Creates a client for the VMM listening on `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let socket_path = socket_path.into();
        let connector = UnixConnector {
            socket_path: socket_path.clone(),
        };
        Self {
            socket_path,
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }

    /// Sends an empty-bodied command, e.g. `vm.boot` or `vm.pause`.
    pub async fn put(&self, endpoint: &str) -> HyperfleetResult<()> {
        self.request(endpoint, None).await
    }

    /// Sends a JSON command payload, e.g. `vm.create` or `vm.restore`.
    pub async fn put_json<T: Serialize>(&self, endpoint: &str, payload: &T) -> HyperfleetResult<()> {
        let body = serde_json::to_vec(payload)?;
        self.request(endpoint, Some(Bytes::from(body))).await
    }

    /// Performs a GET and returns the raw response body.
    pub async fn get(&self, endpoint: &str) -> HyperfleetResult<Bytes> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(endpoint_uri(endpoint)?)
            .header("Host", "localhost")
            .body(Full::new(Bytes::new()))
            .map_err(HyperfleetError::custom)?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| vmm_transport_error(&self.socket_path, e))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(HyperfleetError::custom)?
            .to_bytes();

        if status.as_u16() != 200 && status.as_u16() != 204 {
            return Err(HyperfleetError::VmmApi {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(body)
    }

    /// Returns the current VMM-reported state from `vm.info`.
    pub async fn state(&self) -> HyperfleetResult<String> {
        let body = self.get("vm.info").await?;
        let info: VmInfo = serde_json::from_slice(&body)?;
        Ok(info.state)
    }

    /// Deadline-scoped state probe for the fleet sweep.
    ///
    /// Opens a fresh single-use connection (no keep-alive) so a stuck VMM
    /// cannot pin a pooled connection, and bounds connect + request + parse
    /// under one deadline.
    pub async fn state_with_deadline(&self, deadline: Duration) -> HyperfleetResult<String> {
        let socket_path = self.socket_path.clone();

        let probe = async move {
            let stream = UnixStream::connect(&socket_path).await?;
            let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
                .await
                .map_err(HyperfleetError::custom)?;

            // The connection task dies with the probe; keep-alive is moot.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = Request::builder()
                .method(Method::GET)
                .uri("/api/v1/vm.info")
                .header("Host", "localhost")
                .body(Full::new(Bytes::new()))
                .map_err(HyperfleetError::custom)?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(HyperfleetError::custom)?;

            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(HyperfleetError::custom)?
                .to_bytes();

            if status.as_u16() != 200 {
                return Err(HyperfleetError::VmmApi {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body[..body.len().min(512)]).into_owned(),
                });
            }

            let info: VmInfo = serde_json::from_slice(&body)?;
            Ok(info.state)
        };

        time::timeout(deadline, probe)
            .await
            .map_err(|_| HyperfleetError::Timeout(format!("state probe after {:?}", deadline)))?
    }

    /// Returns true if the control socket exists on disk.
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Waits for the control socket to appear, polling every 2 ms.
    ///
    /// The standard admission gate before any API call on a freshly spawned
    /// VMM.
    pub async fn wait_for_socket(&self, deadline: Duration) -> HyperfleetResult<()> {
        let start = time::Instant::now();
        while start.elapsed() < deadline {
            if self.socket_exists() {
                return Ok(());
            }
            time::sleep(SOCKET_POLL_INTERVAL).await;
        }
        Err(HyperfleetError::Timeout(format!(
            "VMM socket {} after {:?}",
            self.socket_path.display(),
            deadline
        )))
    }

    /// The control socket path this client talks to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn request(&self, endpoint: &str, body: Option<Bytes>) -> HyperfleetResult<()> {
        let mut builder = Request::builder()
            .method(Method::PUT)
            .uri(endpoint_uri(endpoint)?)
            .header("Host", "localhost");
        if body.is_some() {
            builder = builder.header("Content-Type", "application/json");
        }
        let req = builder
            .body(Full::new(body.unwrap_or_default()))
            .map_err(HyperfleetError::custom)?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| vmm_transport_error(&self.socket_path, e))?;

        let status = resp.status();
        if status.as_u16() == 200 || status.as_u16() == 204 {
            return Ok(());
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(HyperfleetError::custom)?
            .to_bytes();
        let body_text = String::from_utf8_lossy(&body).into_owned();

        // Re-issuing a transition the VM is already in (pause while paused,
        // resume while running) is a no-op, not a failure.
        if body_text.contains("InvalidStateTransition") {
            tracing::debug!(endpoint, "VMM reported InvalidStateTransition, treating as no-op");
            return Ok(());
        }

        Err(HyperfleetError::VmmApi {
            status: status.as_u16(),
            body: body_text,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn endpoint_uri(endpoint: &str) -> HyperfleetResult<Uri> {
    format!("http://localhost/api/v1/{}", endpoint)
        .parse()
        .map_err(HyperfleetError::custom)
}

fn vmm_transport_error(
    socket_path: &Path,
    error: hyper_util::client::legacy::Error,
) -> HyperfleetError {
    HyperfleetError::SandboxUnreachable(format!(
        "VMM socket {}: {}",
        socket_path.display(),
        error
    ))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl tower::Service<Uri> for UnixConnector {
    type Response = TokioIo<UnixStream>;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        let path = self.socket_path.clone();
        Box::pin(async move {
            let stream = UnixStream::connect(&path).await?;
            Ok(TokioIo::new(stream))
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::UnixListener,
    };

    /// Serves a single canned HTTP response on a Unix socket.
    async fn serve_once(listener: UnixListener, response: &'static str) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        // Read the request head; the test requests carry no meaningful body.
        let _ = stream.read(&mut buf).await.unwrap();
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_put_treats_invalid_state_transition_as_noop() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vm.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let server = tokio::spawn(serve_once(
            listener,
            "HTTP/1.1 400 Bad Request\r\ncontent-length: 34\r\n\r\n{\"error\":\"InvalidStateTransition\"}",
        ));

        let client = VmmClient::new(&socket);
        client.put("vm.resume").await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_put_surfaces_other_vmm_errors() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vm.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let server = tokio::spawn(serve_once(
            listener,
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 12\r\n\r\ndisk on fire",
        ));

        let client = VmmClient::new(&socket);
        let err = client.put("vm.boot").await.unwrap_err();
        match err {
            HyperfleetError::VmmApi { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("disk on fire"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_state_parses_vm_info() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vm.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let server = tokio::spawn(serve_once(
            listener,
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 19\r\n\r\n{\"state\":\"Running\"}",
        ));

        let client = VmmClient::new(&socket);
        assert_eq!(client.state().await.unwrap(), "Running");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_state_with_deadline_times_out_on_stuck_vmm() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vm.sock");
        // Listener accepts but never answers.
        let listener = UnixListener::bind(&socket).unwrap();
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(5)).await;
        });

        let client = VmmClient::new(&socket);
        let err = client
            .state_with_deadline(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, HyperfleetError::Timeout(_)));
        server.abort();
    }

    #[tokio::test]
    async fn test_wait_for_socket_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let client = VmmClient::new(dir.path().join("missing.sock"));
        let err = client
            .wait_for_socket(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, HyperfleetError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_wait_for_socket_sees_late_bind() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vm.sock");
        let client = VmmClient::new(&socket);

        let socket_clone = socket.clone();
        let binder = tokio::spawn(async move {
            time::sleep(Duration::from_millis(30)).await;
            UnixListener::bind(&socket_clone).unwrap()
        });

        client
            .wait_for_socket(Duration::from_millis(500))
            .await
            .unwrap();
        binder.await.unwrap();
    }
}
