//! Request payloads for the Cloud Hypervisor v0.49+ API schema.

use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The full machine configuration submitted to `vm.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmConfig {
    /// Kernel/initramfs boot payload.
    pub payload: PayloadConfig,

    /// vCPU topology.
    pub cpus: CpusConfig,

    /// Guest memory configuration.
    pub memory: MemoryConfig,

    /// Block devices, first entry is the root overlay.
    pub disks: Vec<DiskConfig>,

    /// Network devices.
    pub net: Vec<NetConfig>,

    /// Entropy source.
    pub rng: RngConfig,

    /// Serial port mode.
    pub serial: ConsoleConfig,

    /// Virtio console mode.
    pub console: ConsoleConfig,

    /// Host-socket-backed vsock device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vsock: Option<VsockConfig>,
}

/// Kernel boot payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadConfig {
    /// Path to the kernel image.
    pub kernel: String,

    /// Kernel command line.
    pub cmdline: String,

    /// Optional initramfs path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initramfs: Option<String>,
}

/// vCPU topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpusConfig {
    /// vCPUs online at boot.
    pub boot_vcpus: u8,

    /// Hotplug ceiling; equal to `boot_vcpus` here.
    pub max_vcpus: u8,
}

/// Guest memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Size in bytes.
    pub size: i64,

    /// Shared memory mapping; required for vhost-user and snapshot restore.
    pub shared: bool,

    /// Allow KSM merging.
    pub mergeable: bool,

    /// Prefault pages at boot.
    pub prefault: bool,
}

/// A block device entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Path to the disk image.
    pub path: String,
}

/// A network device entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Host TAP device name.
    pub tap: String,

    /// Guest NIC MAC address.
    pub mac: String,

    /// Optional guest IP hint; the kernel `ip=` directive is authoritative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Entropy source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RngConfig {
    /// Host entropy source path.
    pub src: String,
}

/// Serial/console mode: `Null`, `Tty` or `File`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// The console mode.
    pub mode: String,
}

/// vsock device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VsockConfig {
    /// Guest CID.
    pub cid: u32,

    /// Host-side Unix socket path the VMM binds.
    pub socket: String,
}

/// Payload for `vm.snapshot`.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRequest {
    /// `file://` URL of the destination directory.
    pub destination_url: String,
}

/// Payload for `vm.restore`.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreRequest {
    /// `file://` URL of the saved state directory.
    pub source_url: String,

    /// Network devices re-attached at restore; the freshly allocated TAP
    /// replaces the one recorded in the snapshot.
    pub net: Vec<NetConfig>,
}

/// The subset of `vm.info` the control plane reads.
#[derive(Debug, Clone, Deserialize)]
pub struct VmInfo {
    /// The VMM-reported state, e.g. `Created`, `Running`, `Paused`, `Loaded`.
    pub state: String,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_config_wire_shape() {
        let config = VmConfig {
            payload: PayloadConfig {
                kernel: "/images/vmlinux".into(),
                cmdline: "console=hvc0 root=/dev/vda rw".into(),
                initramfs: None,
            },
            cpus: CpusConfig {
                boot_vcpus: 2,
                max_vcpus: 2,
            },
            memory: MemoryConfig {
                size: 1024 * 1024 * 1024,
                shared: true,
                mergeable: true,
                prefault: false,
            },
            disks: vec![DiskConfig {
                path: "/instances/x/overlay.qcow2".into(),
            }],
            net: vec![NetConfig {
                tap: "ttap-ab12cd".into(),
                mac: "52:54:00:a8:64:07".into(),
                ip: None,
            }],
            rng: RngConfig {
                src: "/dev/urandom".into(),
            },
            serial: ConsoleConfig { mode: "Null".into() },
            console: ConsoleConfig { mode: "Null".into() },
            vsock: Some(VsockConfig {
                cid: 1007,
                socket: "/instances/x/vsock.sock".into(),
            }),
        };

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["cpus"]["boot_vcpus"], 2);
        assert_eq!(value["memory"]["shared"], true);
        assert_eq!(value["vsock"]["cid"], 1007);
        // Optional fields stay off the wire when unset.
        assert!(value["payload"].get("initramfs").is_none());
        assert!(value["net"][0].get("ip").is_none());
    }

    #[test]
    fn test_restore_request_wire_shape() {
        let request = RestoreRequest {
            source_url: "file:///instances/x/snapshot_state".into(),
            net: vec![NetConfig {
                tap: "ttap-9f00aa".into(),
                mac: "52:54:00:a8:64:09".into(),
                ip: None,
            }],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["source_url"], "file:///instances/x/snapshot_state");
        assert_eq!(value["net"][0]["tap"], "ttap-9f00aa");
    }
}
