//! Support-level derivation
//!
//! Maps detected facts onto a level per capability. Every threshold comes
//! from [`compat`]; this module holds only the combination rules.

use std::collections::HashMap;

use super::compat;
use super::snapshot::{
    Capability, CapabilityEntry, ContainerFacts, HardwareFacts, SoftwareFacts, SupportLevel,
};

/// Derives the full entry map; one record per known capability.
pub fn derive_entries(
    hardware: &HardwareFacts,
    software: &SoftwareFacts,
    container: &ContainerFacts,
) -> HashMap<Capability, CapabilityEntry> {
    let mut entries = HashMap::with_capacity(Capability::ALL.len());
    for capability in Capability::ALL {
        entries.insert(capability, derive_entry(capability, hardware, software, container));
    }
    entries
}

fn derive_entry(
    capability: Capability,
    hardware: &HardwareFacts,
    software: &SoftwareFacts,
    container: &ContainerFacts,
) -> CapabilityEntry {
    let version = &software.version;
    match capability {
        Capability::Container => {
            if version.meets(compat::CONTAINER_MIN)
                && container.package_installed
                && container.enabled
            {
                if container.network_namespace_supported {
                    CapabilityEntry::new(
                        SupportLevel::Full,
                        "Container runtime enabled with network namespace isolation",
                    )
                } else {
                    CapabilityEntry::with_guidance(
                        SupportLevel::Advanced,
                        "Container runtime enabled without network namespaces",
                        format!(
                            "Architecture {} cannot isolate container networks",
                            hardware.architecture
                        ),
                    )
                }
            } else if container.package_installed {
                CapabilityEntry::with_guidance(
                    SupportLevel::Basic,
                    "Container package installed but not enabled",
                    "Enable container mode: /system/device-mode/update container=yes",
                )
            } else {
                CapabilityEntry::with_guidance(
                    SupportLevel::None,
                    "Containers unavailable",
                    format!(
                        "Requires RouterOS {}.{} and the container package",
                        compat::CONTAINER_MIN.0,
                        compat::CONTAINER_MIN.1
                    ),
                )
            }
        }
        Capability::Vif => {
            let version_ok = version.meets(compat::VIF_MIN);
            let runtime_ok = container.package_installed
                && container.enabled
                && container.network_namespace_supported;
            let storage_ok = hardware.free_storage_bytes >= compat::VIF_MIN_STORAGE_BYTES;

            if version_ok && runtime_ok && storage_ok {
                CapabilityEntry::new(
                    SupportLevel::Full,
                    "Virtual interface factory fully supported",
                )
            } else if version_ok && runtime_ok {
                CapabilityEntry::with_guidance(
                    SupportLevel::Basic,
                    "Virtual interfaces limited by free storage",
                    "Free at least 100MiB of storage for container images",
                )
            } else {
                CapabilityEntry::with_guidance(
                    SupportLevel::None,
                    "Virtual interface factory unavailable",
                    format!(
                        "Requires RouterOS {}.{} with an enabled container runtime and network namespaces",
                        compat::VIF_MIN.0,
                        compat::VIF_MIN.1
                    ),
                )
            }
        }
        Capability::Wireless => {
            // wifiwave2 alone upgrades the level even when no wireless
            // chip was reported; only wireless* packages set the chip flag.
            if software.has_package("wifiwave2") {
                CapabilityEntry::new(SupportLevel::Full, "WiFi Wave2 driver stack installed")
            } else if !hardware.has_wireless_chip {
                CapabilityEntry::new(SupportLevel::None, "No wireless hardware detected")
            } else if version.meets(compat::V7) {
                CapabilityEntry::new(SupportLevel::Advanced, "Wireless supported on RouterOS v7")
            } else {
                CapabilityEntry::new(SupportLevel::Basic, "Legacy wireless support")
            }
        }
        Capability::Routing => {
            if software.has_package("routing") {
                CapabilityEntry::new(
                    SupportLevel::Full,
                    "Dynamic routing protocols available (routing package)",
                )
            } else {
                CapabilityEntry::new(SupportLevel::Basic, "Static routing only")
            }
        }
        Capability::Firewall => {
            if version.meets(compat::V7) {
                CapabilityEntry::new(SupportLevel::Full, "v7 firewall feature set")
            } else {
                CapabilityEntry::new(SupportLevel::Advanced, "v6 firewall feature set")
            }
        }
        Capability::Ipv6 => {
            if version.meets(compat::V7) {
                CapabilityEntry::new(SupportLevel::Full, "IPv6 built into RouterOS v7")
            } else if software.has_package("ipv6") {
                CapabilityEntry::new(SupportLevel::Advanced, "IPv6 package installed")
            } else {
                CapabilityEntry::with_guidance(
                    SupportLevel::None,
                    "IPv6 unavailable",
                    "Install the ipv6 package or upgrade to RouterOS v7",
                )
            }
        }
        Capability::Wireguard => {
            if version.meets(compat::V7) {
                CapabilityEntry::new(SupportLevel::Full, "WireGuard built into RouterOS v7")
            } else {
                CapabilityEntry::with_guidance(
                    SupportLevel::None,
                    "WireGuard unavailable",
                    "Upgrade to RouterOS v7",
                )
            }
        }
        Capability::Mpls => package_gate(software, "mpls", "MPLS"),
        Capability::Hotspot => package_gate(software, "hotspot", "Hotspot portal"),
        Capability::UserManager => package_gate(software, "user-manager", "User Manager"),
        Capability::Dude => package_gate(software, "dude", "The Dude server"),
        Capability::Zerotier => {
            if container.enabled && version.meets(compat::VIF_MIN) {
                CapabilityEntry::new(
                    SupportLevel::Advanced,
                    "ZeroTier deployable through the container runtime",
                )
            } else {
                CapabilityEntry::with_guidance(
                    SupportLevel::None,
                    "ZeroTier unavailable",
                    format!(
                        "Requires an enabled container runtime on RouterOS {}.{}",
                        compat::VIF_MIN.0,
                        compat::VIF_MIN.1
                    ),
                )
            }
        }
        Capability::RestApi => {
            if version.meets(compat::REST_API_MIN) {
                CapabilityEntry::new(SupportLevel::Full, "REST API available")
            } else {
                CapabilityEntry::with_guidance(
                    SupportLevel::None,
                    "REST API unavailable",
                    format!(
                        "Requires RouterOS {}.{}",
                        compat::REST_API_MIN.0,
                        compat::REST_API_MIN.1
                    ),
                )
            }
        }
        Capability::BinaryApi => {
            CapabilityEntry::new(SupportLevel::Full, "Binary API available on all versions")
        }
        Capability::Acme => {
            if version.meets(compat::ACME_MIN) {
                CapabilityEntry::new(SupportLevel::Full, "ACME certificate enrollment available")
            } else {
                CapabilityEntry::with_guidance(
                    SupportLevel::None,
                    "ACME unavailable",
                    format!(
                        "Requires RouterOS {}.{}",
                        compat::ACME_MIN.0,
                        compat::ACME_MIN.1
                    ),
                )
            }
        }
        Capability::WifiWave2 => {
            if software.has_package("wifiwave2") && version.meets(compat::V7) {
                CapabilityEntry::new(SupportLevel::Full, "WiFi Wave2 package installed")
            } else {
                CapabilityEntry::with_guidance(
                    SupportLevel::None,
                    "WiFi Wave2 unavailable",
                    "Install the wifiwave2 package on RouterOS v7",
                )
            }
        }
    }
}

fn package_gate(software: &SoftwareFacts, package: &str, label: &str) -> CapabilityEntry {
    if software.has_package(package) {
        CapabilityEntry::new(SupportLevel::Advanced, format!("{label} package installed"))
    } else {
        CapabilityEntry::with_guidance(
            SupportLevel::None,
            format!("{label} unavailable"),
            format!("Install the {package} package"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::parse::parse_version;

    fn facts(
        version: &str,
        packages: &[&str],
        arch: &str,
        storage: u64,
    ) -> (HardwareFacts, SoftwareFacts, ContainerFacts) {
        let software = SoftwareFacts {
            version: parse_version(version),
            packages: packages.iter().map(|p| (*p).to_string()).collect(),
        };
        let hardware = HardwareFacts {
            architecture: arch.to_string(),
            free_storage_bytes: storage,
            has_wireless_chip: packages.iter().any(|p| p.starts_with("wireless")),
            ..Default::default()
        };
        let container = ContainerFacts {
            package_installed: packages.contains(&"container"),
            enabled: packages.contains(&"container"),
            registry_configured: false,
            max_containers: 0,
            network_namespace_supported: compat::supports_network_namespace(arch),
        };
        (hardware, software, container)
    }

    #[test]
    fn every_capability_gets_an_entry() {
        let (hw, sw, c) = facts("7.12 (stable)", &[], "arm64", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries.len(), Capability::ALL.len());
    }

    #[test]
    fn container_full_needs_version_package_enabled_and_netns() {
        let (hw, sw, c) = facts("7.12 (stable)", &["container"], "arm64", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Container].level, SupportLevel::Full);
    }

    #[test]
    fn container_advanced_without_netns() {
        let (hw, sw, c) = facts("7.12 (stable)", &["container"], "mipsbe", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Container].level, SupportLevel::Advanced);
    }

    #[test]
    fn container_basic_when_installed_but_disabled() {
        let (hw, sw, mut c) = facts("7.12 (stable)", &["container"], "arm64", 0);
        c.enabled = false;
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Container].level, SupportLevel::Basic);
    }

    #[test]
    fn vif_gated_on_version_7_13() {
        let (hw, sw, c) = facts("7.12 (stable)", &["container"], "arm64", 512 << 20);
        let entries = derive_entries(&hw, &sw, &c);
        let entry = &entries[&Capability::Vif];
        assert_eq!(entry.level, SupportLevel::None);
        assert!(entry.guidance.as_deref().unwrap().contains("7.13"));
    }

    #[test]
    fn vif_basic_when_only_storage_is_short() {
        let (hw, sw, c) = facts("7.14 (stable)", &["container"], "arm64", 10 << 20);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Vif].level, SupportLevel::Basic);
    }

    #[test]
    fn vif_full_when_everything_met() {
        let (hw, sw, c) = facts("7.14 (stable)", &["container"], "arm64", 512 << 20);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Vif].level, SupportLevel::Full);
    }

    #[test]
    fn wifiwave2_forces_wireless_full_without_chip_flag() {
        let (mut hw, sw, c) = facts("7.12 (stable)", &["wifiwave2"], "arm64", 0);
        hw.has_wireless_chip = false;
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Wireless].level, SupportLevel::Full);
        assert_eq!(entries[&Capability::WifiWave2].level, SupportLevel::Full);
    }

    #[test]
    fn wireless_none_without_chip_or_wave2() {
        let (hw, sw, c) = facts("7.12 (stable)", &[], "arm64", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Wireless].level, SupportLevel::None);
    }

    #[test]
    fn wireless_advanced_on_v7_with_chip() {
        let (hw, sw, c) = facts("7.12 (stable)", &["wireless"], "arm64", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Wireless].level, SupportLevel::Advanced);
    }

    #[test]
    fn wireless_basic_on_v6_with_chip() {
        let (hw, sw, c) = facts("6.49 (stable)", &["wireless"], "arm", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Wireless].level, SupportLevel::Basic);
    }

    #[test]
    fn wireguard_and_firewall_track_v7() {
        let (hw, sw, c) = facts("6.49 (stable)", &[], "arm", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Wireguard].level, SupportLevel::None);
        assert_eq!(entries[&Capability::Firewall].level, SupportLevel::Advanced);

        let (hw, sw, c) = facts("7.1 (stable)", &[], "arm", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Wireguard].level, SupportLevel::Full);
        assert_eq!(entries[&Capability::Firewall].level, SupportLevel::Full);
        assert_eq!(entries[&Capability::RestApi].level, SupportLevel::Full);
    }

    #[test]
    fn package_gated_capabilities() {
        let (hw, sw, c) = facts("7.12 (stable)", &["mpls", "user-manager"], "arm64", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Mpls].level, SupportLevel::Advanced);
        assert_eq!(entries[&Capability::UserManager].level, SupportLevel::Advanced);
        assert_eq!(entries[&Capability::Hotspot].level, SupportLevel::None);
        assert_eq!(entries[&Capability::Dude].level, SupportLevel::None);
    }

    #[test]
    fn zerotier_needs_container_and_vif_version() {
        let (hw, sw, c) = facts("7.14 (stable)", &["container"], "arm64", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Zerotier].level, SupportLevel::Advanced);

        let (hw, sw, c) = facts("7.12 (stable)", &["container"], "arm64", 0);
        let entries = derive_entries(&hw, &sw, &c);
        assert_eq!(entries[&Capability::Zerotier].level, SupportLevel::None);
    }
}
