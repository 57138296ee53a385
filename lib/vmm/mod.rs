//! Cloud Hypervisor control-socket client.
//!
//! Every sandbox's VMM exposes an HTTP/1.1 API on a per-instance Unix
//! socket. This module owns the request surface (`vm.create`, `vm.boot`,
//! `vm.pause`, `vm.resume`, `vm.snapshot`, `vm.restore`, `vm.info`), the
//! socket readiness gate, and the deadline-scoped state probe used by the
//! health reconciler.

mod api;
mod client;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use api::*;
pub use client::*;
