//! Sandbox lifecycle engine.
//!
//! Orchestrates the network allocator, overlay storage and VMM client into
//! the five lifecycle operations: fresh boot, snapshot, restore, stop and
//! delete. Owns the per-sandbox instance directory layout.
//!
//! Partial failures roll back explicitly (kill VMM, delete TAP, remove the
//! instance directory); best-effort cleanup steps log warnings but never
//! mask the originating error.

mod boot;
mod paths;
mod restore;
mod snapshot;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use boot::*;
pub use paths::*;
pub use restore::*;
pub use snapshot::*;
