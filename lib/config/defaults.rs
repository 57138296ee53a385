//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default HTTP listen host (empty means all interfaces).
pub const DEFAULT_SERVER_HOST: &str = "";

/// The default HTTP listen port.
pub const DEFAULT_SERVER_PORT: u16 = 33944;

/// The default directory holding read-only base images.
pub const DEFAULT_BASE_IMAGES_DIR: &str = "/var/lib/hyperfleet/base-images";

/// The default root for per-sandbox instance directories.
pub const DEFAULT_INSTANCES_DIR: &str = "/var/lib/hyperfleet/instances";

/// The default guest kernel image path.
pub const DEFAULT_KERNEL_PATH: &str = "/var/lib/hyperfleet/base-images/vmlinux";

/// The default SQLite metadata database path.
pub const DEFAULT_DB_PATH: &str = "/var/lib/hyperfleet/hyperfleet.db";

/// The default Linux bridge TAP devices are enslaved to.
pub const DEFAULT_BRIDGE_NAME: &str = "vmbr0";

/// The default prefix for allocated TAP device names.
pub const DEFAULT_TAP_PREFIX: &str = "ttap-";

/// The default gateway address, CIDR form.
pub const DEFAULT_GATEWAY_IP: &str = "192.168.100.1/22";

/// The default sandbox address space.
pub const DEFAULT_NETWORK_CIDR: &str = "192.168.100.0/22";

/// The default subnet prefix for address scanning.
pub const DEFAULT_SUBNET_PREFIX: &str = "192.168.100.";

/// The default number of vCPUs for a sandbox.
pub const DEFAULT_SANDBOX_VCPUS: u8 = 1;

/// The default sandbox RAM in MiB.
pub const DEFAULT_SANDBOX_MEMORY_MB: u32 = 1024;

/// The default sandbox disk size in MiB (5 GiB).
pub const DEFAULT_SANDBOX_DISK_MB: u32 = 5120;

/// The default base image type.
pub const DEFAULT_SANDBOX_IMAGE: &str = "debian";

/// Whether the health reconciler runs by default.
pub const DEFAULT_HEALTH_ENABLED: bool = true;

/// The default reconciler sweep interval, in seconds.
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 60;

/// The default number of concurrent VMM state probes per sweep.
pub const DEFAULT_HEALTH_CONCURRENCY: usize = 16;

/// The default TTL for cached API key validations (1 hour).
pub const DEFAULT_API_KEY_CACHE_TTL_SECS: u64 = 3600;

/// The default page size for paginated listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// The maximum page size for paginated listings.
pub const MAX_PAGE_SIZE: u32 = 100;

/// The maximum accepted length of an exec command string.
pub const MAX_COMMAND_LENGTH: usize = 4096;

/// The maximum accepted number of exec arguments.
pub const MAX_ARGS_COUNT: usize = 64;

/// The default exec timeout, in seconds.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

/// The maximum exec timeout, in seconds.
pub const MAX_EXEC_TIMEOUT_SECS: u64 = 300;
