//! Capability detection
//!
//! Runs the ordered detection phases against a router transport and
//! assembles a [`CapabilitySnapshot`]. String-map replies are parsed into
//! typed facts here, at the seam; nothing downstream sees raw maps.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::compat;
use super::levels;
use super::parse::{parse_size, parse_version};
use super::snapshot::{
    CAPABILITY_TTL, CapabilitySnapshot, ContainerFacts, HardwareFacts, SoftwareFacts,
};
use crate::domain_types::RouterId;
use crate::errors::{CoreError, CoreResult, codes};
use crate::time_provider::SharedTimeProvider;
use crate::transport::{SharedRouterTransport, StateQuery};

/// Detects router capabilities through the transport port.
#[derive(Debug, Clone)]
pub struct CapabilityDetector {
    time: SharedTimeProvider,
    ttl: Duration,
}

impl CapabilityDetector {
    /// Creates a detector producing snapshots with the default TTL
    pub fn new(time: SharedTimeProvider) -> Self {
        Self {
            time,
            ttl: CAPABILITY_TTL,
        }
    }

    /// Overrides the snapshot TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Runs all detection phases and derives the entry map.
    #[instrument(skip(self, transport), fields(router_id = %router_id))]
    pub async fn detect(
        &self,
        transport: &SharedRouterTransport,
        router_id: &RouterId,
    ) -> CoreResult<CapabilitySnapshot> {
        let (mut hardware, software) = self.detect_system(transport, router_id).await?;
        self.detect_routerboard(transport, router_id, &mut hardware)
            .await;
        let container = self
            .detect_container(transport, router_id, &hardware, &software)
            .await?;

        let entries = levels::derive_entries(&hardware, &software, &container);

        let detected_at = self.time.now();
        debug!(
            version = %software.version,
            architecture = %hardware.architecture,
            packages = software.packages.len(),
            "capability detection complete"
        );

        Ok(CapabilitySnapshot {
            router_id: router_id.clone(),
            hardware,
            software,
            container,
            entries,
            detected_at,
            expires_at: detected_at + self.ttl,
            is_refreshing: false,
        })
    }

    /// Phases 1-2: `/system/resource` and `/system/package`.
    async fn detect_system(
        &self,
        transport: &SharedRouterTransport,
        router_id: &RouterId,
    ) -> CoreResult<(HardwareFacts, SoftwareFacts)> {
        let reply = transport
            .query_state(StateQuery::path("/system/resource"))
            .await?;
        let row = reply.first().ok_or_else(|| {
            CoreError::protocol_for(
                codes::ROUTER_REPLY_MALFORMED,
                "empty /system/resource reply",
                router_id,
            )
        })?;

        let version = parse_version(field(row, "version"));
        let architecture = field(row, "architecture-name").to_string();
        let cpu_count = field(row, "cpu-count").parse().unwrap_or(1);
        let total_memory_bytes = parse_size(field(row, "total-memory"));
        let free_storage_bytes = parse_size(field(row, "free-hdd-space"));
        let board_name = field(row, "board-name").to_string();

        let packages = transport
            .query_state(StateQuery::path("/system/package").with_fields(&["name"]))
            .await?;
        let package_names: Vec<String> = packages
            .resources
            .iter()
            .filter_map(|r| r.get("name").cloned())
            .collect();

        let has_wireless_chip = package_names
            .iter()
            .any(|p| p == "wireless" || p.starts_with("wireless-"));
        let has_lte = package_names.iter().any(|p| p == "lte");

        let hardware = HardwareFacts {
            architecture,
            board_name,
            model: String::new(),
            serial_number: None,
            total_memory_bytes,
            free_storage_bytes,
            cpu_count,
            has_wireless_chip,
            has_lte,
        };
        let software = SoftwareFacts {
            version,
            packages: package_names,
        };
        Ok((hardware, software))
    }

    /// Phase 3: `/system/routerboard`. Some devices lack this path, so a
    /// failure here only costs the model/serial fields.
    async fn detect_routerboard(
        &self,
        transport: &SharedRouterTransport,
        router_id: &RouterId,
        hardware: &mut HardwareFacts,
    ) {
        match transport
            .query_state(StateQuery::path("/system/routerboard"))
            .await
        {
            Ok(reply) => {
                if let Some(row) = reply.first() {
                    hardware.model = field(row, "model").to_string();
                    let serial = field(row, "serial-number");
                    if !serial.is_empty() {
                        hardware.serial_number = Some(serial.to_string());
                    }
                }
            }
            Err(err) => {
                warn!(
                    router_id = %router_id,
                    error = %err,
                    "routerboard query failed; continuing without model info"
                );
            }
        }
    }

    /// Phase 4: `/container/config`, only when the package is installed.
    async fn detect_container(
        &self,
        transport: &SharedRouterTransport,
        router_id: &RouterId,
        hardware: &HardwareFacts,
        software: &SoftwareFacts,
    ) -> CoreResult<ContainerFacts> {
        let package_installed = software.has_package("container");
        let network_namespace_supported =
            compat::supports_network_namespace(&hardware.architecture);
        let max_containers = compat::estimate_max_containers(hardware.total_memory_bytes);

        if !package_installed {
            return Ok(ContainerFacts {
                package_installed: false,
                enabled: false,
                registry_configured: false,
                max_containers,
                network_namespace_supported,
            });
        }

        let reply = transport
            .query_state(StateQuery::path("/container/config"))
            .await
            .map_err(|e| {
                CoreError::protocol_for(
                    codes::ROUTER_QUERY_FAILED,
                    "container config query failed",
                    router_id,
                )
                .with_source(e)
            })?;

        let (enabled, registry_configured) = reply
            .first()
            .map(|row| {
                let enabled = matches!(field(row, "enabled"), "true" | "yes");
                let registry_configured = !field(row, "registry-url").is_empty();
                (enabled, registry_configured)
            })
            .unwrap_or((false, false));

        Ok(ContainerFacts {
            package_installed,
            enabled,
            registry_configured,
            max_containers,
            network_namespace_supported,
        })
    }
}

fn field<'a>(row: &'a HashMap<String, String>, key: &str) -> &'a str {
    row.get(key).map_or("", String::as_str)
}
