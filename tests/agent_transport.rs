//! End-to-end tests of the agent transport: vsock CONNECT handshake plus
//! the pooled HTTP client, against a fake in-process relay.

use std::time::Duration;

use hyper::Method;
use hyperfleet::{agent::AgentClient, config::Config, HyperfleetError};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
};

const SANDBOX_ID: &str = "65f1c2d3a4b5c6d7e8f90a1b";

/// Serves the vsock relay protocol: CONNECT/OK handshake, then a canned
/// HTTP/1.1 response for each request on the spliced stream.
async fn fake_agent(listener: UnixListener, body: &'static str) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(handle_connection(stream, body));
    }
}

async fn handle_connection(mut stream: UnixStream, body: &'static str) {
    // Handshake line.
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read_exact(&mut byte).await.is_err() {
            return;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    let connect = String::from_utf8_lossy(&line);
    assert!(connect.starts_with("CONNECT "), "bad handshake: {}", connect);
    stream.write_all(b"OK 1024\n").await.unwrap();

    // One HTTP exchange.
    let mut buf = [0u8; 4096];
    let Ok(n) = stream.read(&mut buf).await else {
        return;
    };
    if n == 0 {
        return;
    }
    let request = String::from_utf8_lossy(&buf[..n]);
    assert!(request.contains("HTTP/1.1"), "not an HTTP request: {}", request);

    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    let _ = stream.shutdown().await;
}

fn test_config(instances_dir: &std::path::Path) -> Config {
    std::env::set_var("INSTANCES_DIR", instances_dir);
    let cfg = Config::from_env();
    std::env::remove_var("INSTANCES_DIR");
    cfg
}

#[tokio::test]
async fn test_http_over_vsock_roundtrip() {
    let instances = tempfile::tempdir().unwrap();
    let sandbox_dir = instances.path().join(SANDBOX_ID);
    std::fs::create_dir_all(&sandbox_dir).unwrap();

    let listener = UnixListener::bind(sandbox_dir.join("vsock.sock")).unwrap();
    let server = tokio::spawn(fake_agent(listener, r#"{"status":"ok"}"#));

    let cfg = test_config(instances.path());
    let client = AgentClient::new(&cfg);

    let resp = client.request(Method::GET, SANDBOX_ID, "/").await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let bytes = http_body_util::BodyExt::collect(resp.into_body())
        .await
        .unwrap()
        .to_bytes();
    assert_eq!(&bytes[..], br#"{"status":"ok"}"#);

    server.abort();
}

#[tokio::test]
async fn test_readiness_probe_sees_live_agent() {
    let instances = tempfile::tempdir().unwrap();
    let sandbox_dir = instances.path().join(SANDBOX_ID);
    std::fs::create_dir_all(&sandbox_dir).unwrap();

    let listener = UnixListener::bind(sandbox_dir.join("vsock.sock")).unwrap();
    let server = tokio::spawn(fake_agent(listener, "{}"));

    let cfg = test_config(instances.path());
    let client = AgentClient::new(&cfg);

    client
        .wait_ready(SANDBOX_ID, Duration::from_secs(2))
        .await
        .unwrap();

    server.abort();
}

#[tokio::test]
async fn test_missing_socket_is_unreachable() {
    let instances = tempfile::tempdir().unwrap();
    let cfg = test_config(instances.path());
    let client = AgentClient::new(&cfg);

    let err = client
        .request(Method::GET, SANDBOX_ID, "/")
        .await
        .unwrap_err();
    assert!(matches!(err, HyperfleetError::SandboxUnreachable(_)));
}

#[tokio::test]
async fn test_readiness_probe_times_out_without_agent() {
    let instances = tempfile::tempdir().unwrap();
    let cfg = test_config(instances.path());
    let client = AgentClient::new(&cfg);

    let err = client
        .wait_ready(SANDBOX_ID, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, HyperfleetError::Timeout(_)));
}
