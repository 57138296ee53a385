//! Runtime configuration for the hyperfleet server.
//!
//! All configuration comes from environment variables with sensible defaults;
//! there is no config file. The variable names are part of the operational
//! interface and are documented on each field.

mod defaults;

use std::net::Ipv4Addr;

use getset::Getters;
use ipnetwork::Ipv4Network;

pub use defaults::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Config {
    /// HTTP listener configuration.
    server: ServerConfig,

    /// Filesystem layout.
    paths: PathsConfig,

    /// Host network plane.
    network: NetworkConfig,

    /// Per-sandbox fallback spec.
    sandbox: SandboxConfig,

    /// Health reconciler tuning.
    health: HealthConfig,

    /// TTL for the API key validation cache, in seconds.
    api_key_cache_ttl_secs: u64,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ServerConfig {
    /// Listen host (`SERVER_HOST`, empty means all interfaces).
    host: String,

    /// Listen port (`SERVER_PORT`).
    port: u16,
}

/// Filesystem layout configuration.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PathsConfig {
    /// Root for per-sandbox instance directories (`INSTANCES_DIR`).
    instances_dir: String,

    /// Directory holding `<image>-base.qcow2` files (`BASE_IMAGES_DIR`).
    base_images_dir: String,

    /// Guest kernel image (`KERNEL_PATH`).
    kernel_path: String,

    /// Optional initramfs (`INITRD_PATH`, empty disables).
    initrd_path: String,

    /// SQLite metadata database (`DB_PATH`).
    db_path: String,
}

/// Host network plane configuration.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct NetworkConfig {
    /// The pre-existing Linux bridge sandbox TAPs are enslaved to
    /// (`BRIDGE_NAME`).
    bridge_name: String,

    /// Gateway address, CIDR form accepted (`GATEWAY_IP`).
    gateway_ip: String,

    /// The sandbox address space (`NETWORK_CIDR`).
    network_cidr: String,

    /// Prefix used when scanning for free addresses (`SUBNET_PREFIX`).
    subnet_prefix: String,

    /// Name prefix for allocated TAP devices (`TAP_PREFIX`).
    tap_prefix: String,
}

/// Fallback sandbox spec applied when a create request omits values.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SandboxConfig {
    /// `SANDBOX_DEFAULT_VCPUS`
    default_vcpus: u8,

    /// `SANDBOX_DEFAULT_MEMORY_MB`
    default_memory_mb: u32,

    /// `SANDBOX_DEFAULT_DISK_MB`
    default_disk_mb: u32,

    /// `SANDBOX_DEFAULT_IMAGE`
    default_image: String,

    /// Route the guest console to a TTY for boot debugging
    /// (`SANDBOX_DEBUG_BOOT_CONSOLE`).
    debug_boot_console: bool,
}

/// Health reconciler configuration.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct HealthConfig {
    /// `HEALTH_ENABLED`
    enabled: bool,

    /// Sweep interval in seconds (`HEALTH_INTERVAL_SEC`).
    interval_secs: u64,

    /// Maximum concurrent VMM state probes (`HEALTH_CONCURRENCY`).
    concurrency: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Builds the configuration from the process environment, falling back
    /// to the documented defaults.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", DEFAULT_SERVER_HOST),
                port: env_parse("SERVER_PORT", DEFAULT_SERVER_PORT),
            },
            paths: PathsConfig {
                instances_dir: env_or("INSTANCES_DIR", DEFAULT_INSTANCES_DIR),
                base_images_dir: env_or("BASE_IMAGES_DIR", DEFAULT_BASE_IMAGES_DIR),
                kernel_path: env_or("KERNEL_PATH", DEFAULT_KERNEL_PATH),
                initrd_path: env_or("INITRD_PATH", ""),
                db_path: env_or("DB_PATH", DEFAULT_DB_PATH),
            },
            network: NetworkConfig {
                bridge_name: env_or("BRIDGE_NAME", DEFAULT_BRIDGE_NAME),
                gateway_ip: env_or("GATEWAY_IP", DEFAULT_GATEWAY_IP),
                network_cidr: env_or("NETWORK_CIDR", DEFAULT_NETWORK_CIDR),
                subnet_prefix: env_or("SUBNET_PREFIX", DEFAULT_SUBNET_PREFIX),
                tap_prefix: env_or("TAP_PREFIX", DEFAULT_TAP_PREFIX),
            },
            sandbox: SandboxConfig {
                default_vcpus: env_parse("SANDBOX_DEFAULT_VCPUS", DEFAULT_SANDBOX_VCPUS),
                default_memory_mb: env_parse("SANDBOX_DEFAULT_MEMORY_MB", DEFAULT_SANDBOX_MEMORY_MB),
                default_disk_mb: env_parse("SANDBOX_DEFAULT_DISK_MB", DEFAULT_SANDBOX_DISK_MB),
                default_image: env_or("SANDBOX_DEFAULT_IMAGE", DEFAULT_SANDBOX_IMAGE),
                debug_boot_console: env_bool("SANDBOX_DEBUG_BOOT_CONSOLE", false),
            },
            health: HealthConfig {
                enabled: env_bool("HEALTH_ENABLED", DEFAULT_HEALTH_ENABLED),
                interval_secs: env_parse("HEALTH_INTERVAL_SEC", DEFAULT_HEALTH_INTERVAL_SECS),
                concurrency: env_parse("HEALTH_CONCURRENCY", DEFAULT_HEALTH_CONCURRENCY),
            },
            api_key_cache_ttl_secs: env_parse(
                "API_KEY_CACHE_TTL_SECONDS",
                DEFAULT_API_KEY_CACHE_TTL_SECS,
            ),
        }
    }
}

impl ServerConfig {
    /// Returns the socket address string the listener binds to. An empty
    /// host means all interfaces.
    pub fn address(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{}:{}", host, self.port)
    }
}

impl NetworkConfig {
    /// Converts `NETWORK_CIDR` into a dotted-decimal netmask, falling back
    /// to /22 if the value cannot be parsed.
    pub fn netmask(&self) -> String {
        self.network_cidr
            .parse::<Ipv4Network>()
            .map(|net| net.mask().to_string())
            .unwrap_or_else(|_| "255.255.252.0".to_string())
    }

    /// Strips any CIDR suffix from the gateway address
    /// (`192.168.100.1/22` -> `192.168.100.1`).
    pub fn clean_gateway(&self) -> String {
        if let Some((addr, _)) = self.gateway_ip.split_once('/') {
            if addr.parse::<Ipv4Addr>().is_ok() {
                return addr.to_string();
            }
        }
        self.gateway_ip.clone()
    }

    /// Parses the sandbox address space.
    pub fn parsed_cidr(&self) -> Option<Ipv4Network> {
        self.network_cidr.parse().ok()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "t" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn network(cidr: &str, gateway: &str) -> NetworkConfig {
        NetworkConfig {
            bridge_name: "vmbr0".into(),
            gateway_ip: gateway.into(),
            network_cidr: cidr.into(),
            subnet_prefix: "192.168.100.".into(),
            tap_prefix: "ttap-".into(),
        }
    }

    #[test]
    fn test_netmask_from_cidr() {
        assert_eq!(network("192.168.100.0/22", "x").netmask(), "255.255.252.0");
        assert_eq!(network("10.0.0.0/24", "x").netmask(), "255.255.255.0");
        assert_eq!(network("not-a-cidr", "x").netmask(), "255.255.252.0");
    }

    #[test]
    fn test_clean_gateway() {
        assert_eq!(
            network("x", "192.168.100.1/22").clean_gateway(),
            "192.168.100.1"
        );
        assert_eq!(
            network("x", "192.168.100.1").clean_gateway(),
            "192.168.100.1"
        );
    }
}
