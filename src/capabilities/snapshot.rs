//! Capability snapshot data model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::domain_types::RouterId;

/// How long a detected snapshot stays valid
pub const CAPABILITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A named router feature category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Container,
    Vif,
    Wireless,
    Routing,
    Firewall,
    Mpls,
    Ipv6,
    Hotspot,
    UserManager,
    Dude,
    Wireguard,
    Zerotier,
    RestApi,
    BinaryApi,
    Acme,
    WifiWave2,
}

impl Capability {
    /// Every known capability; `detect` produces one entry per member.
    pub const ALL: [Capability; 16] = [
        Self::Container,
        Self::Vif,
        Self::Wireless,
        Self::Routing,
        Self::Firewall,
        Self::Mpls,
        Self::Ipv6,
        Self::Hotspot,
        Self::UserManager,
        Self::Dude,
        Self::Wireguard,
        Self::Zerotier,
        Self::RestApi,
        Self::BinaryApi,
        Self::Acme,
        Self::WifiWave2,
    ];

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Vif => "vif",
            Self::Wireless => "wireless",
            Self::Routing => "routing",
            Self::Firewall => "firewall",
            Self::Mpls => "mpls",
            Self::Ipv6 => "ipv6",
            Self::Hotspot => "hotspot",
            Self::UserManager => "user_manager",
            Self::Dude => "dude",
            Self::Wireguard => "wireguard",
            Self::Zerotier => "zerotier",
            Self::RestApi => "rest_api",
            Self::BinaryApi => "binary_api",
            Self::Acme => "acme",
            Self::WifiWave2 => "wifi_wave2",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Degree of support for a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SupportLevel {
    None,
    Basic,
    Advanced,
    Full,
}

/// Level plus the human-facing explanation for one capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub level: SupportLevel,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl CapabilityEntry {
    /// Entry without guidance
    pub fn new(level: SupportLevel, description: impl Into<String>) -> Self {
        Self {
            level,
            description: description.into(),
            guidance: None,
        }
    }

    /// Entry with a remediation hint
    pub fn with_guidance(
        level: SupportLevel,
        description: impl Into<String>,
        guidance: impl Into<String>,
    ) -> Self {
        Self {
            level,
            description: description.into(),
            guidance: Some(guidance.into()),
        }
    }
}

/// RouterOS release channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    Stable,
    Testing,
    Development,
    #[default]
    Unknown,
}

impl ReleaseChannel {
    /// Lowercase channel name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Testing => "testing",
            Self::Development => "development",
            Self::Unknown => "unknown",
        }
    }
}

/// Parsed RouterOS version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RouterOsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub channel: ReleaseChannel,
    pub raw: String,
}

impl RouterOsVersion {
    /// Whether the version is at least `major.minor`
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    /// Whether the version meets a `(major, minor)` threshold pair
    pub fn meets(&self, min: (u32, u32)) -> bool {
        self.at_least(min.0, min.1)
    }
}

impl std::fmt::Display for RouterOsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Hardware facts read from the router
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HardwareFacts {
    pub architecture: String,
    pub board_name: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    pub total_memory_bytes: u64,
    pub free_storage_bytes: u64,
    pub cpu_count: u32,
    pub has_wireless_chip: bool,
    pub has_lte: bool,
}

/// Software facts read from the router
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SoftwareFacts {
    pub version: RouterOsVersion,
    pub packages: Vec<String>,
}

impl SoftwareFacts {
    /// Whether the exact package name is installed
    pub fn has_package(&self, name: &str) -> bool {
        self.packages.iter().any(|p| p == name)
    }
}

/// Container subsystem facts
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerFacts {
    pub package_installed: bool,
    pub enabled: bool,
    pub registry_configured: bool,
    pub max_containers: u32,
    pub network_namespace_supported: bool,
}

/// Everything detection learned about one router, with validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub router_id: RouterId,
    pub hardware: HardwareFacts,
    pub software: SoftwareFacts,
    pub container: ContainerFacts,
    pub entries: HashMap<Capability, CapabilityEntry>,
    pub detected_at: SystemTime,
    pub expires_at: SystemTime,
    /// Transient: true while a background refresh is in flight
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_refreshing: bool,
}

impl CapabilitySnapshot {
    /// The snapshot's validity window, `expires_at - detected_at`
    pub fn ttl(&self) -> Duration {
        self.expires_at
            .duration_since(self.detected_at)
            .unwrap_or_default()
    }

    /// Expired once `now` passes `expires_at`
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }

    /// Stale once more than half the TTL has elapsed
    pub fn is_stale(&self, now: SystemTime) -> bool {
        match now.duration_since(self.detected_at) {
            Ok(age) => age > self.ttl() / 2,
            Err(_) => false,
        }
    }

    /// The entry for a capability, if detection recorded one
    pub fn entry(&self, capability: Capability) -> Option<&CapabilityEntry> {
        self.entries.get(&capability)
    }

    /// The support level for a capability; `None` level when unrecorded
    pub fn level(&self, capability: Capability) -> SupportLevel {
        self.entries
            .get(&capability)
            .map_or(SupportLevel::None, |e| e.level)
    }
}
