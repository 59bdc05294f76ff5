//! Error code namespace
//!
//! Codes are grouped by category prefix: `P1xx` platform, `R2xx` protocol,
//! `N3xx` network, `V4xx` validation, `A5xx` auth, `S6xx` resource, `I500`
//! internal.

/// Host platform cannot run the requested feature
pub const PLATFORM_UNSUPPORTED: &str = "P100";
/// cgroups-v2 controllers are missing; resource limiting runs degraded
pub const CGROUPS_UNAVAILABLE: &str = "P101";
/// RouterOS version below the feature's minimum
pub const VERSION_UNSUPPORTED: &str = "P102";
/// A cgroup control file could not be written
pub const CGROUP_WRITE_FAILED: &str = "P103";

/// A router state query failed
pub const ROUTER_QUERY_FAILED: &str = "R200";
/// A router command failed
pub const ROUTER_COMMAND_FAILED: &str = "R201";
/// A router reply was missing expected fields
pub const ROUTER_REPLY_MALFORMED: &str = "R202";

/// Could not reach a network peer
pub const CONNECTION_FAILED: &str = "N300";
/// No free port remained for the router/protocol pair
pub const PORT_POOL_EXHAUSTED: &str = "N301";
/// No free VLAN ID remained in the configured pool
pub const VLAN_POOL_EXHAUSTED: &str = "N302";
/// Requested VLAN ID is already present on the router
pub const VLAN_CONFLICT: &str = "N303";

/// Generic invalid input
pub const INVALID_INPUT: &str = "V400";
/// VLAN pool reconfiguration rejected
pub const INVALID_POOL_CONFIG: &str = "V401";
/// Numeric value outside its permitted range
pub const VALUE_OUT_OF_RANGE: &str = "V402";

/// Caller lacks the required permission
pub const PERMISSION_DENIED: &str = "A500";

/// Referenced resource does not exist
pub const RESOURCE_NOT_FOUND: &str = "S600";
/// Uniqueness conflict; the operation may be retried
pub const RESOURCE_CONFLICT: &str = "S601";
/// Resource has been closed and accepts no further operations
pub const RESOURCE_CLOSED: &str = "S602";
/// A local resource (file, process entry) could not be read
pub const RESOURCE_READ_FAILED: &str = "S603";

/// Unexpected internal failure
pub const INTERNAL: &str = "I500";
