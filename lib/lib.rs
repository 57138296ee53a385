//! `hyperfleet` is a control-plane server for a fleet of lightweight,
//! hardware-isolated microVM sandboxes backed by a Cloud Hypervisor-compatible
//! VMM.
//!
//! # Overview
//!
//! hyperfleet provisions sandboxes on demand, gives each one a private L2/L3
//! network identity on a shared bridge, and proxies the in-sandbox agent API
//! (command execution, interactive pseudo-terminals, file I/O, filesystem
//! watching, process management) to external clients over HTTP and
//! WebSockets. The guest agent itself is only reachable through a
//! per-sandbox virtio-vsock Unix socket.
//!
//! # Architecture
//!
//! - **network**: TAP allocation, deterministic MAC assignment, late bridge
//!   binding
//! - **storage**: copy-on-write overlay disks over read-only base images
//! - **vmm**: HTTP-over-Unix-socket client for the VMM control API
//! - **lifecycle**: fresh boot, snapshot, restore, stop, delete
//! - **vsock**: the CONNECT/OK handshake adapter for reaching guest ports
//! - **agent**: the shared, pooled HTTP/WebSocket transport to the guest agent
//! - **management**: the SQLite metadata store, API-key validation, and the
//!   background health reconciler
//! - **server**: the REST/WebSocket surface

#![warn(missing_docs)]

mod error;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serializes tests that read or mutate process environment variables.
    pub fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod agent;
pub mod config;
pub mod lifecycle;
pub mod management;
pub mod network;
pub mod server;
pub mod storage;
pub mod utils;
pub mod vmm;
pub mod vsock;

pub use error::*;
