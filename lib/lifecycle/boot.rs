use std::{path::Path, process::Stdio, time::Duration};

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tokio::{fs, process::Command};

use crate::{
    config::Config,
    management::SandboxSpec,
    network,
    vmm::{
        ConsoleConfig, CpusConfig, DiskConfig, MemoryConfig, NetConfig, PayloadConfig,
        RestoreRequest, RngConfig, VmConfig, VmmClient, VsockConfig,
    },
    HyperfleetError, HyperfleetResult,
};

use super::InstancePaths;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Hostname passed on the kernel `ip=` directive.
const GUEST_HOSTNAME: &str = "hyperfleet";

/// How long to wait for the VMM control socket after spawn.
const SOCKET_WAIT: Duration = Duration::from_secs(2);

/// How much of the VMM log to attach to a boot failure.
const LOG_TAIL_BYTES: usize = 8 * 1024;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Boots a sandbox: fresh boot when `restore_state` is `None`, API-driven
/// restore otherwise.
///
/// The sequence is deliberate:
/// 1. derive the MAC from the IP and create a *detached* TAP,
/// 2. spawn an empty VMM with only `--api-socket`/`--log-file`,
/// 3. wait for the control socket,
/// 4. inject the full config (or the restore payload) over the API,
/// 5. only then enslave the TAP to the bridge (late binding).
///
/// Injecting config via the API instead of flags is what makes restore and
/// fresh boot share a spawn path; late binding is what keeps the VMM's TAP
/// open from racing bridge membership (EBUSY on `vm.restore`).
pub async fn start(
    cfg: &Config,
    spec: &SandboxSpec,
    overlay_path: &Path,
    restore_state: Option<&Path>,
) -> HyperfleetResult<()> {
    let paths = InstancePaths::new(cfg, &spec.id);
    let net_cfg = cfg.get_network();

    let mac = network::generate_mac(&spec.ip)?;
    tracing::debug!(sandbox = %spec.id, ip = %spec.ip, mac = %mac, "derived sandbox MAC");

    // Detached: bridge membership comes after the VMM opens the device.
    let tap_name = network::create_random_tap(&mac, net_cfg.get_tap_prefix()).await?;
    fs::write(paths.tap_file(), &tap_name).await?;

    spawn_vmm(&paths).await?;

    let client = VmmClient::new(paths.vm_sock());
    if let Err(e) = client.wait_for_socket(SOCKET_WAIT).await {
        let log_tail = read_log_tail(&paths).await;
        let _ = stop(cfg, &spec.id).await;
        tracing::error!(sandbox = %spec.id, error = %e, "VMM socket never appeared");
        return Err(HyperfleetError::BootFailed(log_tail));
    }

    if let Some(state_dir) = restore_state {
        let state_dir = fs::canonicalize(state_dir).await.unwrap_or_else(|_| state_dir.to_path_buf());
        let restore = RestoreRequest {
            source_url: format!("file://{}", state_dir.display()),
            net: vec![NetConfig {
                tap: tap_name.clone(),
                mac: mac.clone(),
                ip: None,
            }],
        };
        if let Err(e) = client.put_json("vm.restore", &restore).await {
            let _ = stop(cfg, &spec.id).await;
            return Err(e);
        }
    } else {
        let vm_config = compose_vm_config(cfg, spec, overlay_path, &tap_name, &mac, &paths);
        if let Err(e) = client.put_json("vm.create", &vm_config).await {
            let _ = stop(cfg, &spec.id).await;
            return Err(e);
        }
        if let Err(e) = client.put("vm.boot").await {
            let _ = stop(cfg, &spec.id).await;
            return Err(e);
        }
    }

    // Late binding: the VMM holds the TAP open now, so bridge membership is
    // safe to establish.
    if let Err(e) = network::enable_tap(net_cfg.get_bridge_name(), &tap_name).await {
        let _ = stop(cfg, &spec.id).await;
        return Err(e);
    }

    tracing::info!(sandbox = %spec.id, tap = %tap_name, "sandbox VM active");
    Ok(())
}

/// Stops a sandbox's VMM and tears down its networking, best effort.
///
/// The instance directory is retained so logs stay inspectable.
pub async fn stop(cfg: &Config, sandbox_id: &str) -> HyperfleetResult<()> {
    let paths = InstancePaths::new(cfg, sandbox_id);

    if let Ok(pid_text) = fs::read_to_string(paths.pid_file()).await {
        if let Ok(pid) = pid_text.trim().parse::<i32>() {
            if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::warn!(sandbox = %sandbox_id, pid, error = %e, "SIGTERM failed");
            }
        }
        let _ = fs::remove_file(paths.pid_file()).await;
    }

    if let Ok(tap_name) = fs::read_to_string(paths.tap_file()).await {
        let tap_name = tap_name.trim();
        if let Err(e) = network::delete_tap(tap_name).await {
            tracing::warn!(sandbox = %sandbox_id, tap = %tap_name, error = %e, "TAP delete failed");
        }
        let _ = fs::remove_file(paths.tap_file()).await;
    }

    tracing::info!(sandbox = %sandbox_id, "sandbox VM stopped");
    Ok(())
}

/// Stops a sandbox and removes its instance directory tree.
pub async fn delete(cfg: &Config, sandbox_id: &str) -> HyperfleetResult<()> {
    if let Err(e) = stop(cfg, sandbox_id).await {
        tracing::warn!(sandbox = %sandbox_id, error = %e, "stop during delete failed");
    }

    let paths = InstancePaths::new(cfg, sandbox_id);
    tracing::info!(sandbox = %sandbox_id, dir = %paths.dir().display(), "deleting instance");
    if paths.dir().exists() {
        fs::remove_dir_all(paths.dir()).await?;
    }
    Ok(())
}

/// Pauses a running sandbox. Pausing a paused VM is a no-op.
pub async fn pause(cfg: &Config, sandbox_id: &str) -> HyperfleetResult<()> {
    running_client(cfg, sandbox_id)?.put("vm.pause").await
}

/// Resumes a paused sandbox. Resuming a running VM is a no-op.
pub async fn resume(cfg: &Config, sandbox_id: &str) -> HyperfleetResult<()> {
    running_client(cfg, sandbox_id)?.put("vm.resume").await
}

/// Returns the raw `vm.info` JSON for a sandbox.
pub async fn info(cfg: &Config, sandbox_id: &str) -> HyperfleetResult<String> {
    let body = running_client(cfg, sandbox_id)?.get("vm.info").await?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Composes the kernel command line for a fresh boot.
///
/// Networking is configured entirely by the kernel's `ip=` autoconfig
/// directive; interface renaming is suppressed so `eth0` is stable. Caller
/// environment variables are NOT placed here; they are injected through the
/// agent's `/env` endpoint after boot.
pub fn compose_cmdline(cfg: &Config, ip: &str) -> String {
    let net_cfg = cfg.get_network();
    let console_args = if *cfg.get_sandbox().get_debug_boot_console() {
        "console=ttyS0 console=hvc0"
    } else {
        "console=hvc0"
    };

    let kernel_ip_args = format!(
        "ip={}::{}:{}:{}:eth0:off",
        ip,
        net_cfg.clean_gateway(),
        net_cfg.netmask(),
        GUEST_HOSTNAME,
    );

    format!(
        "{} root=/dev/vda rw init=/sbin/init net.ifnames=0 biosdevname=0 {}",
        console_args, kernel_ip_args
    )
}

fn compose_vm_config(
    cfg: &Config,
    spec: &SandboxSpec,
    overlay_path: &Path,
    tap_name: &str,
    mac: &str,
    paths: &InstancePaths,
) -> VmConfig {
    let debug_console = *cfg.get_sandbox().get_debug_boot_console();
    let console_mode = if debug_console { "Tty" } else { "Null" };

    let cmdline = compose_cmdline(cfg, &spec.ip);
    tracing::debug!(sandbox = %spec.id, cmdline = %cmdline, "composed kernel command line");

    let initramfs = {
        let path = cfg.get_paths().get_initrd_path();
        if path.is_empty() {
            None
        } else {
            Some(path.clone())
        }
    };

    VmConfig {
        payload: PayloadConfig {
            kernel: cfg.get_paths().get_kernel_path().clone(),
            cmdline,
            initramfs,
        },
        cpus: CpusConfig {
            boot_vcpus: spec.cpus,
            max_vcpus: spec.cpus,
        },
        memory: MemoryConfig {
            size: i64::from(spec.memory_mb) * 1024 * 1024,
            shared: true,
            mergeable: true,
            prefault: false,
        },
        disks: vec![DiskConfig {
            path: overlay_path.display().to_string(),
        }],
        net: vec![NetConfig {
            tap: tap_name.to_string(),
            mac: mac.to_string(),
            ip: None,
        }],
        rng: RngConfig {
            src: "/dev/urandom".to_string(),
        },
        serial: ConsoleConfig {
            mode: console_mode.to_string(),
        },
        console: ConsoleConfig {
            mode: console_mode.to_string(),
        },
        vsock: Some(VsockConfig {
            cid: network::vsock_cid(&spec.ip),
            socket: paths.vsock_sock().display().to_string(),
        }),
    }
}

/// Spawns an empty VMM process in its own session, records its PID, and
/// releases the handle.
async fn spawn_vmm(paths: &InstancePaths) -> HyperfleetResult<()> {
    let log_file = std::fs::File::create(paths.log_file())?;
    let log_clone = log_file.try_clone()?;

    let mut command = Command::new("cloud-hypervisor");
    command
        .arg("--api-socket")
        .arg(paths.vm_sock())
        .arg("--log-file")
        .arg(paths.log_file())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_clone));

    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| {
        HyperfleetError::BootFailed(format!("cloud-hypervisor spawn failed: {}", e))
    })?;

    let pid = child.id().unwrap_or(0);
    fs::write(paths.pid_file(), pid.to_string()).await?;
    tracing::info!(pid, socket = %paths.vm_sock().display(), "spawned VMM in API mode");

    // The VMM runs in its own session; dropping the handle releases it
    // without killing the process.
    drop(child);
    Ok(())
}

fn running_client(cfg: &Config, sandbox_id: &str) -> HyperfleetResult<VmmClient> {
    let client = VmmClient::new(InstancePaths::new(cfg, sandbox_id).vm_sock());
    if !client.socket_exists() {
        return Err(HyperfleetError::NotFound(format!(
            "sandbox {} is not running (socket missing)",
            sandbox_id
        )));
    }
    Ok(client)
}

async fn read_log_tail(paths: &InstancePaths) -> String {
    match fs::read(paths.log_file()).await {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(LOG_TAIL_BYTES);
            String::from_utf8_lossy(&bytes[start..]).into_owned()
        }
        Err(_) => String::from("(no VMM log captured)"),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let _guard = crate::testing::env_lock();
        std::env::remove_var("SANDBOX_DEBUG_BOOT_CONSOLE");
        std::env::remove_var("GATEWAY_IP");
        std::env::remove_var("NETWORK_CIDR");
        Config::from_env()
    }

    #[test]
    fn test_cmdline_contains_single_ip_directive() {
        let cfg = test_config();
        let cmdline = compose_cmdline(&cfg, "192.168.100.7");

        assert_eq!(cmdline.matches("ip=").count(), 1);
        assert!(cmdline
            .contains("ip=192.168.100.7::192.168.100.1:255.255.252.0:hyperfleet:eth0:off"));
    }

    #[test]
    fn test_cmdline_boot_essentials() {
        let cfg = test_config();
        let cmdline = compose_cmdline(&cfg, "192.168.100.7");

        assert!(cmdline.starts_with("console=hvc0"));
        assert!(cmdline.contains("root=/dev/vda rw init=/sbin/init"));
        assert!(cmdline.contains("net.ifnames=0 biosdevname=0"));
    }

    #[test]
    fn test_cmdline_is_deterministic_per_ip() {
        let cfg = test_config();
        assert_eq!(
            compose_cmdline(&cfg, "192.168.100.7"),
            compose_cmdline(&cfg, "192.168.100.7")
        );
        assert_ne!(
            compose_cmdline(&cfg, "192.168.100.7"),
            compose_cmdline(&cfg, "192.168.100.8")
        );
    }
}
