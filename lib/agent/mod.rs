//! Transport to the in-guest agent.
//!
//! The agent is an HTTP server on guest vsock port 1024, reachable only
//! through each sandbox's relay socket (see [`crate::vsock`]). This module
//! owns the process-wide pooled HTTP client whose dialer resolves the host
//! portion of a URI as a sandbox id, the WebSocket dial used by the relay,
//! and the guest filesystem operations built on shelled-out commands.

mod client;
pub(crate) mod fsops;
mod ws;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use client::*;
pub use fsops::*;
pub use ws::*;
