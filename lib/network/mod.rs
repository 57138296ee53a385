//! Host network plane: deterministic MAC assignment and TAP device
//! management.
//!
//! TAP devices are created detached and only enslaved to the bridge after
//! the VMM has opened them (late binding). Attaching a TAP that is already a
//! bridge port makes the VMM's open fail with EBUSY, which shows up most
//! reliably during `vm.restore`.

mod mac;
mod tap;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use mac::*;
pub use tap::*;
