//! Domain types for the NasNet control-plane core
//!
//! Strongly-typed domain values shared across the capability, allocator,
//! resource, and logging subsystems.

use nutype::nutype;
use uuid::Uuid;

/// Identifier of a managed router, as assigned by the panel.
#[nutype(
    validate(len_char_min = 1, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        Deref
    )
)]
pub struct RouterId(String);

/// Unique identifier for a service instance
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Creates a new random instance ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier of the feature a service instance belongs to
#[nutype(
    validate(len_char_min = 1, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        Deref
    )
)]
pub struct FeatureId(String);

/// Unique identifier for a port or VLAN allocation row
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct AllocationId(Uuid);

impl AllocationId {
    /// Creates a new random allocation ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Per-request identifier injected into presented errors
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random request ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Kind of helper service an allocation belongs to (`tor`, `singbox`, ...)
#[nutype(
    validate(len_char_min = 1, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        Deref
    )
)]
pub struct ServiceType(String);

/// TCP/UDP port number, 1..=65535
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct PortNumber(u16);

impl PortNumber {
    /// Gets the value as a plain u16
    pub fn as_u16(&self) -> u16 {
        self.into_inner()
    }
}

/// 802.1Q VLAN identifier, 1..=4094
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 4094),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct VlanId(u16);

impl VlanId {
    /// Gets the value as a plain u16
    pub fn as_u16(&self) -> u16 {
        self.into_inner()
    }
}

/// Memory size in megabytes
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct MemoryMb(u64);

impl MemoryMb {
    /// Gets the value as a plain u64
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }

    /// The size in bytes
    pub fn as_bytes(&self) -> u64 {
        self.into_inner() * 1_048_576
    }
}

/// Transport protocol of a port allocation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl PortProtocol {
    /// Canonical wire/store spelling (`TCP` / `UDP`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl std::fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PortProtocol {
    type Err = UnknownProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Self::Tcp),
            "UDP" => Ok(Self::Udp),
            other => Err(UnknownProtocolError(other.to_string())),
        }
    }
}

/// Error returned when parsing an unknown protocol string
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown port protocol: {0}")]
pub struct UnknownProtocolError(pub String);
