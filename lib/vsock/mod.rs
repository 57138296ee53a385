//! The host-side vsock CONNECT adapter.
//!
//! The VMM exposes each guest's vsock as a per-sandbox Unix socket speaking
//! a tiny line protocol: the host writes `CONNECT <port>\n` and the relay
//! answers `OK <port>\n` before splicing the stream through to the guest
//! listener. Everything that talks to the guest agent (the pooled HTTP
//! transport, the WebSocket relay, session exec, the readiness probe)
//! funnels through [`dial`].

use std::{path::Path, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    time,
};

use crate::{config::Config, HyperfleetError, HyperfleetResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The well-known guest agent vsock port.
pub const GUEST_AGENT_PORT: u32 = 1024;

/// Upper bound on the handshake response line.
const MAX_HANDSHAKE_LINE: usize = 64;

/// Fallback dial timeout when the caller passes zero.
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Dials a guest port on a sandbox through its vsock relay socket.
///
/// Fails fast if the socket file is absent, performs the CONNECT handshake
/// under `timeout`, and returns the live stream with no deadline attached.
pub async fn dial(
    cfg: &Config,
    sandbox_id: &str,
    port: u32,
    timeout: Duration,
) -> HyperfleetResult<UnixStream> {
    let socket_path = Path::new(cfg.get_paths().get_instances_dir())
        .join(sandbox_id)
        .join("vsock.sock");

    dial_socket(&socket_path, port, timeout).await
}

/// Dials a guest port through an explicit relay socket path.
pub async fn dial_socket(
    socket_path: &Path,
    port: u32,
    timeout: Duration,
) -> HyperfleetResult<UnixStream> {
    let timeout = if timeout.is_zero() {
        DEFAULT_DIAL_TIMEOUT
    } else {
        timeout
    };

    if !socket_path.exists() {
        return Err(HyperfleetError::SandboxUnreachable(format!(
            "vsock socket not found: {}",
            socket_path.display()
        )));
    }

    time::timeout(timeout, handshake(socket_path, port))
        .await
        .map_err(|_| {
            HyperfleetError::Timeout(format!(
                "vsock handshake on {} after {:?}",
                socket_path.display(),
                timeout
            ))
        })?
}

async fn handshake(socket_path: &Path, port: u32) -> HyperfleetResult<UnixStream> {
    let mut stream = UnixStream::connect(socket_path).await.map_err(|e| {
        HyperfleetError::SandboxUnreachable(format!(
            "failed to dial vsock socket {}: {}",
            socket_path.display(),
            e
        ))
    })?;

    stream
        .write_all(format!("CONNECT {}\n", port).as_bytes())
        .await?;

    // Read the response one byte at a time. A bulk read could consume the
    // first byte(s) of the guest's own reply that follow the `OK` line.
    let mut line = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.map_err(|e| {
            HyperfleetError::VsockHandshakeRejected(format!("handshake read failed: {}", e))
        })?;

        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);

        if line.len() > MAX_HANDSHAKE_LINE {
            return Err(HyperfleetError::VsockHandshakeRejected(format!(
                "handshake response exceeded {} bytes",
                MAX_HANDSHAKE_LINE
            )));
        }
    }

    let response = String::from_utf8_lossy(&line);
    let response = response.trim();
    if !response.starts_with("OK") {
        return Err(HyperfleetError::VsockHandshakeRejected(format!(
            "relay replied {:?}",
            response
        )));
    }

    Ok(stream)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::UnixListener;

    /// A relay that answers the handshake then echoes one payload.
    async fn fake_relay(listener: UnixListener, reply: &'static [u8], payload: &'static [u8]) {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(std::str::from_utf8(&buf[..n]).unwrap().starts_with("CONNECT "));

        stream.write_all(reply).await.unwrap();
        if !payload.is_empty() {
            stream.write_all(payload).await.unwrap();
        }
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_accepts_ok_and_preserves_first_payload_byte() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vsock.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        // The relay sends the agent payload immediately after `OK 1024\n`;
        // the handshake reader must not swallow any of it.
        let relay = tokio::spawn(fake_relay(listener, b"OK 1024\n", b"HTTP/1.1 200 OK\r\n"));

        let mut stream = dial_socket(&socket, GUEST_AGENT_PORT, Duration::from_secs(1))
            .await
            .unwrap();

        let mut payload = Vec::new();
        stream.read_to_end(&mut payload).await.unwrap();
        assert_eq!(payload, b"HTTP/1.1 200 OK\r\n");
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_accepts_bare_ok() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vsock.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let relay = tokio::spawn(fake_relay(listener, b"OK\n", b""));

        dial_socket(&socket, GUEST_AGENT_PORT, Duration::from_secs(1))
            .await
            .unwrap();
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_rejects_error_reply() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vsock.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let relay = tokio::spawn(fake_relay(listener, b"ERR busy\n", b""));

        let err = dial_socket(&socket, GUEST_AGENT_PORT, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HyperfleetError::VsockHandshakeRejected(_)));
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_rejects_oversized_reply() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vsock.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let relay = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await.unwrap();
            // 80 bytes, no newline in the first 65.
            stream.write_all(&[b'X'; 80]).await.unwrap();
            stream.write_all(b"\n").await.unwrap();
        });

        let err = dial_socket(&socket, GUEST_AGENT_PORT, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HyperfleetError::VsockHandshakeRejected(_)));
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_fails_fast_on_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let err = dial_socket(
            &dir.path().join("nope.sock"),
            GUEST_AGENT_PORT,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HyperfleetError::SandboxUnreachable(_)));
    }
}
