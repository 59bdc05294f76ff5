//! Version and platform compatibility thresholds
//!
//! Single source of truth for every "requires RouterOS >= X.Y" rule used
//! by level derivation. Thresholds are plain `(major, minor)` pairs read
//! through [`RouterOsVersion::meets`](super::snapshot::RouterOsVersion::meets).

use regex::Regex;
use std::sync::LazyLock;

/// Container runtime shipped with 7.4
pub const CONTAINER_MIN: (u32, u32) = (7, 4);
/// Container-backed virtual interfaces need 7.13
pub const VIF_MIN: (u32, u32) = (7, 13);
/// REST API endpoint shipped with 7.1
pub const REST_API_MIN: (u32, u32) = (7, 1);
/// ACME certificate enrollment shipped with 7.2
pub const ACME_MIN: (u32, u32) = (7, 2);
/// WireGuard, nftables-style firewall, and built-in IPv6 arrived with v7
pub const V7: (u32, u32) = (7, 0);

/// Minimum free storage for the virtual-interface factory
pub const VIF_MIN_STORAGE_BYTES: u64 = 100 << 20;

/// Upper bound on the container estimate regardless of memory
pub const MAX_CONTAINERS_CAP: u64 = 10;
/// Memory budgeted per container when estimating capacity
pub const CONTAINER_MEMORY_SLICE_BYTES: u64 = 50 << 20;

static NETNS_ARCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"arm64|x86|amd64").expect("netns arch pattern is valid"));

/// Whether the architecture supports container network namespaces
pub fn supports_network_namespace(architecture: &str) -> bool {
    NETNS_ARCH.is_match(architecture)
}

/// Estimated container capacity: one per 50 MiB of memory, capped at 10
pub fn estimate_max_containers(total_memory_bytes: u64) -> u32 {
    let by_memory = total_memory_bytes / CONTAINER_MEMORY_SLICE_BYTES;
    by_memory.min(MAX_CONTAINERS_CAP) as u32
}
