//! Port registry
//!
//! Auto-increment TCP/UDP port allocation per router. The in-memory cache
//! and the store are consulted together under one lock held for the whole
//! allocation, so there is no window between finding a free port and
//! persisting it; the store's unique constraint settles races with other
//! nodes.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::domain_types::{
    AllocationId, InstanceId, PortNumber, PortProtocol, RouterId, ServiceType,
};
use crate::errors::{CoreError, CoreResult, codes};
use crate::repository::{
    PortAllocationRow, PortAllocationStore, ServiceInstanceStatus, ServiceInstanceStore,
};
use crate::time_provider::SharedTimeProvider;

/// Ports never handed out regardless of store state
pub const DEFAULT_RESERVED_PORTS: [u16; 8] = [22, 53, 80, 443, 8080, 8291, 8728, 8729];

/// Probing gives up after this many increments past the current maximum
const MAX_PROBE_ATTEMPTS: u32 = 100;

/// Preferred ports per service type, tried in order before probing.
pub fn preferred_ports(service_type: &ServiceType) -> &'static [u16] {
    match service_type.as_str() {
        "tor" => &[9050, 9151],
        "singbox" => &[1080],
        "xray" => &[1081],
        "mtproxy" => &[8888],
        "psiphon" => &[4443],
        "adguard" => &[53, 3000],
        _ => &[10000],
    }
}

/// A successful allocation
#[derive(Debug, Clone)]
pub struct PortLease {
    pub allocation_id: AllocationId,
    pub port: PortNumber,
}

type PortKey = (RouterId, u16, PortProtocol);

/// Thread-safe, store-backed port allocator.
pub struct PortRegistry {
    store: Arc<dyn PortAllocationStore>,
    instances: Arc<dyn ServiceInstanceStore>,
    time: SharedTimeProvider,
    reserved: HashSet<u16>,
    allocated: Mutex<HashSet<PortKey>>,
}

impl PortRegistry {
    /// Creates a registry with the default reserved set, warming the cache
    /// from the store.
    pub async fn new(
        store: Arc<dyn PortAllocationStore>,
        instances: Arc<dyn ServiceInstanceStore>,
        time: SharedTimeProvider,
    ) -> CoreResult<Self> {
        Self::with_reserved_ports(store, instances, time, DEFAULT_RESERVED_PORTS.into()).await
    }

    /// Creates a registry with a custom reserved set.
    pub async fn with_reserved_ports(
        store: Arc<dyn PortAllocationStore>,
        instances: Arc<dyn ServiceInstanceStore>,
        time: SharedTimeProvider,
        reserved: HashSet<u16>,
    ) -> CoreResult<Self> {
        let rows = store.list_all().await.map_err(CoreError::from)?;
        let allocated: HashSet<PortKey> = rows
            .iter()
            .map(|r| (r.router_id.clone(), r.port.as_u16(), r.protocol))
            .collect();
        debug!(existing = allocated.len(), "port registry cache warmed");

        Ok(Self {
            store,
            instances,
            time,
            reserved,
            allocated: Mutex::new(allocated),
        })
    }

    /// Allocates a port for an instance, preferring the service's base
    /// ports and falling back to incrementing past the router's current
    /// maximum.
    #[instrument(skip(self, notes), fields(router_id = %router_id, service_type = %service_type))]
    pub async fn allocate_port(
        &self,
        router_id: &RouterId,
        instance_id: InstanceId,
        service_type: &ServiceType,
        protocol: PortProtocol,
        notes: Option<String>,
    ) -> CoreResult<PortLease> {
        let mut cache = self.allocated.lock().await;

        for &port in preferred_ports(service_type) {
            if self
                .try_claim(&mut cache, router_id, port, protocol)
                .await?
            {
                return self
                    .persist(
                        &mut cache,
                        router_id,
                        port,
                        protocol,
                        instance_id,
                        service_type,
                        notes,
                    )
                    .await;
            }
        }

        let max = self
            .store
            .max_port(router_id, protocol)
            .await
            .map_err(CoreError::from)?;
        // With an empty store the probe starts past the service's last
        // preferred port.
        let mut candidate = max.unwrap_or_else(|| {
            preferred_ports(service_type).iter().copied().max().unwrap_or(10000)
        });

        for _ in 0..MAX_PROBE_ATTEMPTS {
            if candidate >= u16::MAX {
                return Err(CoreError::network(
                    codes::PORT_POOL_EXHAUSTED,
                    "port range exhausted at 65535",
                )
                .with_context("routerId", router_id.to_string())
                .with_context("protocol", protocol.as_str()));
            }
            candidate += 1;

            if self
                .try_claim(&mut cache, router_id, candidate, protocol)
                .await?
            {
                return self
                    .persist(
                        &mut cache,
                        router_id,
                        candidate,
                        protocol,
                        instance_id,
                        service_type,
                        notes,
                    )
                    .await;
            }
        }

        Err(CoreError::network(
            codes::PORT_POOL_EXHAUSTED,
            format!("no free port found within {MAX_PROBE_ATTEMPTS} attempts"),
        )
        .with_context("routerId", router_id.to_string())
        .with_context("protocol", protocol.as_str()))
    }

    /// A port is claimable when it is not reserved and both the cache and
    /// the store agree it is free. A row found in the store repairs the
    /// cache on the way.
    async fn try_claim(
        &self,
        cache: &mut HashSet<PortKey>,
        router_id: &RouterId,
        port: u16,
        protocol: PortProtocol,
    ) -> CoreResult<bool> {
        if self.reserved.contains(&port) {
            return Ok(false);
        }
        let key = (router_id.clone(), port, protocol);
        if cache.contains(&key) {
            return Ok(false);
        }
        let port_number = PortNumber::try_new(port)
            .map_err(|e| CoreError::internal(format!("invalid candidate port: {e}")))?;
        if self
            .store
            .exists(router_id, port_number, protocol)
            .await
            .map_err(CoreError::from)?
        {
            cache.insert(key);
            return Ok(false);
        }
        Ok(true)
    }

    async fn persist(
        &self,
        cache: &mut HashSet<PortKey>,
        router_id: &RouterId,
        port: u16,
        protocol: PortProtocol,
        instance_id: InstanceId,
        service_type: &ServiceType,
        notes: Option<String>,
    ) -> CoreResult<PortLease> {
        let port_number = PortNumber::try_new(port)
            .map_err(|e| CoreError::internal(format!("invalid candidate port: {e}")))?;
        let row = PortAllocationRow {
            id: AllocationId::generate(),
            router_id: router_id.clone(),
            port: port_number,
            protocol,
            instance_id,
            service_type: service_type.clone(),
            notes,
            created_at: DateTime::<Utc>::from(self.time.now()),
        };

        self.store.insert(&row).await.map_err(CoreError::from)?;
        cache.insert((router_id.clone(), port, protocol));

        info!(port, protocol = %protocol, "port allocated");
        Ok(PortLease {
            allocation_id: row.id,
            port: row.port,
        })
    }

    /// Releases an allocation; fails if the tuple is not allocated.
    #[instrument(skip(self), fields(router_id = %router_id, port = %port))]
    pub async fn release_port(
        &self,
        router_id: &RouterId,
        port: PortNumber,
        protocol: PortProtocol,
    ) -> CoreResult<()> {
        let mut cache = self.allocated.lock().await;
        let removed = self
            .store
            .remove(router_id, port, protocol)
            .await
            .map_err(CoreError::from)?;
        cache.remove(&(router_id.clone(), port.as_u16(), protocol));

        if removed {
            info!("port released");
            Ok(())
        } else {
            Err(CoreError::resource_state(
                codes::RESOURCE_NOT_FOUND,
                "port allocation not found",
                "port_allocation",
                &format!("{router_id}:{port}/{protocol}"),
                "missing",
            ))
        }
    }

    /// Whether the port could currently be allocated.
    pub async fn is_port_available(
        &self,
        router_id: &RouterId,
        port: PortNumber,
        protocol: PortProtocol,
    ) -> CoreResult<bool> {
        if self.reserved.contains(&port.as_u16()) {
            return Ok(false);
        }
        {
            let cache = self.allocated.lock().await;
            if cache.contains(&(router_id.clone(), port.as_u16(), protocol)) {
                return Ok(false);
            }
        }
        let in_store = self
            .store
            .exists(router_id, port, protocol)
            .await
            .map_err(CoreError::from)?;
        Ok(!in_store)
    }

    /// Allocations currently recorded for a router.
    pub async fn allocations_for_router(
        &self,
        router_id: &RouterId,
    ) -> CoreResult<Vec<PortAllocationRow>> {
        self.store
            .list_for_router(router_id)
            .await
            .map_err(CoreError::from)
    }

    /// Allocations currently recorded for an instance.
    pub async fn allocations_for_instance(
        &self,
        instance_id: InstanceId,
    ) -> CoreResult<Vec<PortAllocationRow>> {
        self.store
            .list_for_instance(instance_id)
            .await
            .map_err(CoreError::from)
    }

    /// Finds allocations whose instance is gone or being deleted. Does not
    /// mutate anything.
    pub async fn detect_orphans(
        &self,
        router_id: &RouterId,
    ) -> CoreResult<Vec<PortAllocationRow>> {
        let rows = self
            .store
            .list_for_router(router_id)
            .await
            .map_err(CoreError::from)?;
        let checks =
            futures::future::join_all(rows.iter().map(|row| self.is_orphaned(row))).await;

        let mut orphans = Vec::new();
        for (row, orphaned) in rows.into_iter().zip(checks) {
            if orphaned? {
                orphans.push(row);
            }
        }
        Ok(orphans)
    }

    /// Deletes every orphaned allocation for the router; returns how many.
    #[instrument(skip(self), fields(router_id = %router_id))]
    pub async fn cleanup_orphans(&self, router_id: &RouterId) -> CoreResult<usize> {
        let orphans = self.detect_orphans(router_id).await?;
        let mut cache = self.allocated.lock().await;
        let mut removed = 0;
        for row in &orphans {
            if self
                .store
                .remove_by_id(row.id)
                .await
                .map_err(CoreError::from)?
            {
                cache.remove(&(row.router_id.clone(), row.port.as_u16(), row.protocol));
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "orphaned port allocations cleaned up");
        }
        Ok(removed)
    }

    async fn is_orphaned(&self, row: &PortAllocationRow) -> CoreResult<bool> {
        let instance = self
            .instances
            .find(row.instance_id)
            .await
            .map_err(CoreError::from)?;
        Ok(match instance {
            None => true,
            Some(instance) => instance.status == ServiceInstanceStatus::Deleting,
        })
    }
}
