//! The per-sandbox instance directory layout.
//!
//! Operators inspect these files directly, so the names are part of the
//! interface:
//!
//! ```text
//! <instances_dir>/<id>/
//!   overlay.qcow2     copy-on-write disk
//!   vm.sock           VMM control socket
//!   vsock.sock        host-side vsock relay socket
//!   vm.pid            VMM process id
//!   vm.tap            name of the allocated TAP device
//!   vm.log            VMM log
//!   snapshots/<ts>/   finalized snapshots ({state,overlay.qcow2})
//!   snapshot_temp/    in-flight snapshot scratch space
//!   snapshot_state/   RAM state staged for a live restore
//! ```

use std::path::{Path, PathBuf};

use crate::config::Config;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Path helper for one sandbox's instance directory.
#[derive(Debug, Clone)]
pub struct InstancePaths {
    dir: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InstancePaths {
    /// Resolves the layout for a sandbox id under the configured root.
    pub fn new(cfg: &Config, sandbox_id: &str) -> Self {
        Self {
            dir: Path::new(cfg.get_paths().get_instances_dir()).join(sandbox_id),
        }
    }

    /// The instance directory itself.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The copy-on-write overlay disk.
    pub fn overlay(&self) -> PathBuf {
        self.dir.join("overlay.qcow2")
    }

    /// The VMM control socket.
    pub fn vm_sock(&self) -> PathBuf {
        self.dir.join("vm.sock")
    }

    /// The host-side vsock relay socket.
    pub fn vsock_sock(&self) -> PathBuf {
        self.dir.join("vsock.sock")
    }

    /// The VMM PID file.
    pub fn pid_file(&self) -> PathBuf {
        self.dir.join("vm.pid")
    }

    /// The marker file recording the allocated TAP name.
    pub fn tap_file(&self) -> PathBuf {
        self.dir.join("vm.tap")
    }

    /// The VMM log file.
    pub fn log_file(&self) -> PathBuf {
        self.dir.join("vm.log")
    }

    /// The finalized snapshots directory.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.dir.join("snapshots")
    }

    /// Scratch directory for an in-flight snapshot dump.
    pub fn snapshot_temp(&self) -> PathBuf {
        self.dir.join("snapshot_temp")
    }

    /// RAM state staged for a live restore.
    pub fn snapshot_state(&self) -> PathBuf {
        self.dir.join("snapshot_state")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_names() {
        let _guard = crate::testing::env_lock();
        let cfg = Config::from_env();
        let paths = InstancePaths::new(&cfg, "65f1c2d3a4b5c6d7e8f90a1b");

        let dir = Path::new(cfg.get_paths().get_instances_dir()).join("65f1c2d3a4b5c6d7e8f90a1b");
        let dir = dir.as_path();
        assert_eq!(paths.dir(), dir);
        assert_eq!(paths.overlay(), dir.join("overlay.qcow2"));
        assert_eq!(paths.vm_sock(), dir.join("vm.sock"));
        assert_eq!(paths.vsock_sock(), dir.join("vsock.sock"));
        assert_eq!(paths.pid_file(), dir.join("vm.pid"));
        assert_eq!(paths.tap_file(), dir.join("vm.tap"));
        assert_eq!(paths.log_file(), dir.join("vm.log"));
        assert_eq!(paths.snapshots_dir(), dir.join("snapshots"));
        assert_eq!(paths.snapshot_temp(), dir.join("snapshot_temp"));
        assert_eq!(paths.snapshot_state(), dir.join("snapshot_state"));
    }
}
