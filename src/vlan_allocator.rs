//! VLAN allocator
//!
//! Pool-bounded VLAN ID allocation per router, with a router-side conflict
//! check and pool-pressure events. The pool range lives in the `network`
//! settings namespace; allocation state is cached in memory and protected
//! by one lock held across the whole find-persist-cache sequence.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::domain_types::{AllocationId, InstanceId, RouterId, ServiceType, VlanId};
use crate::errors::{CoreError, CoreResult, codes};
use crate::events::{
    Event, EventPayload, EventPriority, PoolWarningLevel, SharedEventBus, VlanPoolWarning,
};
use crate::repository::{
    ServiceInstanceStatus, ServiceInstanceStore, SettingRow, SettingsStore, VlanAllocationRow,
    VlanAllocationStatus, VlanAllocationStore,
};
use crate::time_provider::SharedTimeProvider;
use crate::transport::{SharedRouterTransport, StateQuery};

/// Settings namespace holding the pool bounds
pub const SETTINGS_NAMESPACE: &str = "network";
/// Settings key for the pool's first VLAN ID
pub const POOL_START_KEY: &str = "vlan_pool_start";
/// Settings key for the pool's last VLAN ID
pub const POOL_END_KEY: &str = "vlan_pool_end";

const DEFAULT_POOL_START: u16 = 100;
const DEFAULT_POOL_END: u16 = 199;

/// IEEE 802.1Q reserves these; they are skipped even inside the pool.
const RESERVED_VLAN_IDS: [u16; 2] = [1, 4094];

const WARN_UTILIZATION_PERCENT: f64 = 80.0;
const CRITICAL_UTILIZATION_PERCENT: f64 = 95.0;

/// The contiguous range of allocatable VLAN IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub start: u16,
    pub end: u16,
}

impl PoolConfig {
    /// Number of allocatable IDs: range size minus reserved IDs inside it
    pub fn capacity(&self) -> u32 {
        (self.start..=self.end)
            .filter(|id| !RESERVED_VLAN_IDS.contains(id))
            .count() as u32
    }

    /// Whether the ID falls inside the range
    pub fn contains(&self, vlan_id: u16) -> bool {
        (self.start..=self.end).contains(&vlan_id)
    }
}

/// A successful VLAN allocation
#[derive(Debug, Clone)]
pub struct VlanLease {
    pub allocation_id: AllocationId,
    pub vlan_id: VlanId,
    pub subnet: String,
}

/// Occupancy of the pool as seen by one router
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    pub total: u32,
    pub allocated: u32,
    pub available: u32,
    pub utilization_percent: f64,
    pub should_warn: bool,
}

type VlanKey = (RouterId, u16);

#[derive(Debug)]
struct VlanState {
    pool: PoolConfig,
    allocated: HashSet<VlanKey>,
}

/// Thread-safe, store-backed VLAN allocator.
pub struct VlanAllocator {
    store: Arc<dyn VlanAllocationStore>,
    instances: Arc<dyn ServiceInstanceStore>,
    settings: Arc<dyn SettingsStore>,
    events: SharedEventBus,
    time: SharedTimeProvider,
    state: Mutex<VlanState>,
}

impl VlanAllocator {
    /// Creates an allocator: loads (or seeds) the pool bounds from the
    /// settings store and warms the allocation cache.
    pub async fn new(
        store: Arc<dyn VlanAllocationStore>,
        instances: Arc<dyn ServiceInstanceStore>,
        settings: Arc<dyn SettingsStore>,
        events: SharedEventBus,
        time: SharedTimeProvider,
    ) -> CoreResult<Self> {
        let pool = Self::load_pool_config(settings.as_ref()).await?;

        let rows = store.list_allocated().await.map_err(CoreError::from)?;
        let allocated: HashSet<VlanKey> = rows
            .iter()
            .map(|r| (r.router_id.clone(), r.vlan_id.as_u16()))
            .collect();
        debug!(
            pool_start = pool.start,
            pool_end = pool.end,
            existing = allocated.len(),
            "vlan allocator ready"
        );

        Ok(Self {
            store,
            instances,
            settings,
            events,
            time,
            state: Mutex::new(VlanState { pool, allocated }),
        })
    }

    async fn load_pool_config(settings: &dyn SettingsStore) -> CoreResult<PoolConfig> {
        let start = settings
            .get(SETTINGS_NAMESPACE, POOL_START_KEY)
            .await
            .map_err(CoreError::from)?
            .and_then(|row| row.as_i64());
        let end = settings
            .get(SETTINGS_NAMESPACE, POOL_END_KEY)
            .await
            .map_err(CoreError::from)?
            .and_then(|row| row.as_i64());

        let pool = match (start, end) {
            (Some(start), Some(end)) => {
                let start = u16::try_from(start).map_err(|_| bad_pool_value("pool_start", start))?;
                let end = u16::try_from(end).map_err(|_| bad_pool_value("pool_end", end))?;
                validate_pool_bounds(start, end)?;
                PoolConfig { start, end }
            }
            _ => {
                // First run: persist the defaults so they show up as
                // editable settings.
                let defaults = PoolConfig {
                    start: DEFAULT_POOL_START,
                    end: DEFAULT_POOL_END,
                };
                settings
                    .put_many(&[
                        SettingRow::number(
                            SETTINGS_NAMESPACE,
                            POOL_START_KEY,
                            i64::from(defaults.start),
                        ),
                        SettingRow::number(
                            SETTINGS_NAMESPACE,
                            POOL_END_KEY,
                            i64::from(defaults.end),
                        ),
                    ])
                    .await
                    .map_err(CoreError::from)?;
                defaults
            }
        };
        Ok(pool)
    }

    /// Allocates the lowest free VLAN ID in the pool for an instance.
    ///
    /// A candidate is skipped when the cache or store already holds it,
    /// when it is an 802.1Q-reserved ID, or when the router reports an
    /// interface with the same VLAN ID. A failed router query also skips
    /// the candidate: a conflict we cannot rule out is treated as real.
    #[instrument(skip(self, transport), fields(router_id = %router_id, service_type = %service_type))]
    pub async fn allocate_vlan(
        &self,
        transport: &SharedRouterTransport,
        router_id: &RouterId,
        instance_id: InstanceId,
        service_type: &ServiceType,
    ) -> CoreResult<VlanLease> {
        let mut state = self.state.lock().await;
        let pool = state.pool;

        for candidate in pool.start..=pool.end {
            if RESERVED_VLAN_IDS.contains(&candidate) {
                continue;
            }
            let key = (router_id.clone(), candidate);
            if state.allocated.contains(&key) {
                continue;
            }
            let vlan_id = VlanId::try_new(candidate)
                .map_err(|e| CoreError::internal(format!("invalid candidate vlan: {e}")))?;
            if self
                .store
                .exists_allocated(router_id, vlan_id)
                .await
                .map_err(CoreError::from)?
            {
                state.allocated.insert(key);
                continue;
            }
            match self.router_has_vlan(transport, candidate).await {
                Ok(true) => {
                    debug!(vlan_id = candidate, "vlan present on router; skipping");
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        vlan_id = candidate,
                        error = %err,
                        "router vlan query failed; treating as conflict"
                    );
                    continue;
                }
            }

            let subnet = subnet_for(candidate);
            let row = VlanAllocationRow {
                id: AllocationId::generate(),
                router_id: router_id.clone(),
                vlan_id,
                instance_id,
                service_type: service_type.clone(),
                subnet: subnet.clone(),
                status: VlanAllocationStatus::Allocated,
                created_at: DateTime::<Utc>::from(self.time.now()),
            };
            self.store.insert(&row).await.map_err(CoreError::from)?;
            state.allocated.insert(key);

            let status = Self::status_of(&state, router_id);
            let warning = self.pool_warning(router_id, status);
            drop(state);

            if let Some(event) = warning {
                if let Err(err) = self.events.publish(event).await {
                    warn!(error = %err, "failed to publish pool warning");
                }
            }

            info!(vlan_id = candidate, subnet = %subnet, "vlan allocated");
            return Ok(VlanLease {
                allocation_id: row.id,
                vlan_id,
                subnet,
            });
        }

        Err(CoreError::network(codes::VLAN_POOL_EXHAUSTED, "pool exhausted")
            .with_context("routerId", router_id.to_string())
            .with_context("poolStart", pool.start)
            .with_context("poolEnd", pool.end))
    }

    async fn router_has_vlan(
        &self,
        transport: &SharedRouterTransport,
        vlan_id: u16,
    ) -> CoreResult<bool> {
        let reply = transport
            .query_state(StateQuery::path("/interface/vlan").with_fields(&["vlan-id", "name"]))
            .await?;
        Ok(reply.resources.iter().any(|row| {
            row.get("vlan-id")
                .and_then(|v| v.parse::<u16>().ok())
                .is_some_and(|v| v == vlan_id)
        }))
    }

    /// Marks an allocation released. The row stays in the store for audit.
    #[instrument(skip(self), fields(router_id = %router_id, vlan_id = %vlan_id))]
    pub async fn release_vlan(&self, router_id: &RouterId, vlan_id: VlanId) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let changed = self
            .store
            .mark_released(router_id, vlan_id)
            .await
            .map_err(CoreError::from)?;
        state.allocated.remove(&(router_id.clone(), vlan_id.as_u16()));

        if changed {
            info!("vlan released");
            Ok(())
        } else {
            Err(CoreError::resource_state(
                codes::RESOURCE_NOT_FOUND,
                "vlan allocation not found",
                "vlan_allocation",
                &format!("{router_id}:{vlan_id}"),
                "missing",
            ))
        }
    }

    /// Current pool occupancy for one router.
    pub async fn pool_status(&self, router_id: &RouterId) -> PoolStatus {
        let state = self.state.lock().await;
        Self::status_of(&state, router_id)
    }

    /// The active pool bounds.
    pub async fn pool_config(&self) -> PoolConfig {
        self.state.lock().await.pool
    }

    /// Replaces the pool bounds. Rejected when the range leaves 1..=4094,
    /// is inverted, or would strand an existing allocated row outside it.
    /// Takes effect in memory immediately and persists to settings; the
    /// settings rows are marked requires-restart for other processes.
    #[instrument(skip(self))]
    pub async fn update_pool_config(&self, start: u16, end: u16) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        validate_pool_bounds(start, end)?;

        let new_pool = PoolConfig { start, end };
        let stranded = self
            .store
            .list_allocated()
            .await
            .map_err(CoreError::from)?
            .into_iter()
            .find(|row| !new_pool.contains(row.vlan_id.as_u16()));
        if let Some(row) = stranded {
            return Err(CoreError::validation_field(
                codes::INVALID_POOL_CONFIG,
                "invalid pool configuration",
                "pool_range",
                format!("{start}-{end}"),
                &format!("existing allocation {} falls outside the new range", row.vlan_id),
            ));
        }

        self.settings
            .put_many(&[
                SettingRow::number(SETTINGS_NAMESPACE, POOL_START_KEY, i64::from(start)),
                SettingRow::number(SETTINGS_NAMESPACE, POOL_END_KEY, i64::from(end)),
            ])
            .await
            .map_err(CoreError::from)?;
        state.pool = new_pool;

        info!(start, end, "vlan pool reconfigured");
        Ok(())
    }

    /// Finds allocated rows whose instance is gone or being deleted.
    pub async fn detect_orphans(
        &self,
        router_id: &RouterId,
    ) -> CoreResult<Vec<VlanAllocationRow>> {
        let rows = self
            .store
            .list_allocated_for_router(router_id)
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

    /// Releases every orphaned allocation for the router; returns how many.
    #[instrument(skip(self), fields(router_id = %router_id))]
    pub async fn cleanup_orphans(&self, router_id: &RouterId) -> CoreResult<usize> {
        let orphans = self.detect_orphans(router_id).await?;
        let mut state = self.state.lock().await;
        let mut released = 0;
        for row in &orphans {
            if self
                .store
                .mark_released(&row.router_id, row.vlan_id)
                .await
                .map_err(CoreError::from)?
            {
                state
                    .allocated
                    .remove(&(row.router_id.clone(), row.vlan_id.as_u16()));
                released += 1;
            }
        }
        if released > 0 {
            info!(released, "orphaned vlan allocations released");
        }
        Ok(released)
    }

    async fn is_orphaned(&self, row: &VlanAllocationRow) -> CoreResult<bool> {
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

    fn status_of(state: &VlanState, router_id: &RouterId) -> PoolStatus {
        let total = state.pool.capacity();
        let allocated = state
            .allocated
            .iter()
            .filter(|(r, _)| r == router_id)
            .count() as u32;
        let available = total.saturating_sub(allocated);
        let utilization_percent = if total == 0 {
            0.0
        } else {
            f64::from(allocated) / f64::from(total) * 100.0
        };
        PoolStatus {
            total,
            allocated,
            available,
            utilization_percent,
            should_warn: utilization_percent >= WARN_UTILIZATION_PERCENT,
        }
    }

    fn pool_warning(&self, router_id: &RouterId, status: PoolStatus) -> Option<Event> {
        let (level, priority, action) =
            if status.utilization_percent >= CRITICAL_UTILIZATION_PERCENT {
                (
                    PoolWarningLevel::Critical,
                    EventPriority::Critical,
                    "expand_pool",
                )
            } else if status.utilization_percent >= WARN_UTILIZATION_PERCENT {
                (PoolWarningLevel::Warning, EventPriority::Normal, "cleanup")
            } else {
                return None;
            };

        Some(Event::new(
            priority,
            "vlan-allocator",
            DateTime::<Utc>::from(self.time.now()),
            EventPayload::VlanPoolWarning(VlanPoolWarning {
                router_id: router_id.clone(),
                total: status.total,
                allocated: status.allocated,
                available: status.available,
                utilization_percent: status.utilization_percent,
                level,
                recommended_action: action.to_string(),
            }),
        ))
    }
}

/// Deterministic per-VLAN subnet: `10.99.{vlan}.0/24`
pub fn subnet_for(vlan_id: u16) -> String {
    format!("10.99.{vlan_id}.0/24")
}

fn validate_pool_bounds(start: u16, end: u16) -> CoreResult<()> {
    if start < 1 || end > 4094 || start > end {
        return Err(CoreError::validation_field(
            codes::INVALID_POOL_CONFIG,
            "invalid pool configuration",
            "pool_range",
            format!("{start}-{end}"),
            "1 <= start <= end <= 4094",
        ));
    }
    Ok(())
}

fn bad_pool_value(field: &str, value: i64) -> CoreError {
    CoreError::validation_field(
        codes::INVALID_POOL_CONFIG,
        "invalid pool configuration",
        field,
        value,
        "1 <= start <= end <= 4094",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventBus;
    use crate::repository::ServiceInstanceRow;
    use crate::storage::{
        MemoryServiceInstanceStore, MemorySettingsStore, MemoryVlanAllocationStore,
    };
    use crate::time_provider::ManualClock;
    use crate::transport::StubRouterTransport;

    fn router() -> RouterId {
        RouterId::try_new("rtr-1".to_string()).unwrap()
    }

    fn service(name: &str) -> ServiceType {
        ServiceType::try_new(name.to_string()).unwrap()
    }

    struct Fixture {
        allocator: VlanAllocator,
        store: Arc<MemoryVlanAllocationStore>,
        instances: Arc<MemoryServiceInstanceStore>,
        settings: Arc<MemorySettingsStore>,
        events: Arc<RecordingEventBus>,
        transport: SharedRouterTransport,
    }

    async fn fixture() -> Fixture {
        fixture_with_pool(None).await
    }

    async fn fixture_with_pool(pool: Option<(u16, u16)>) -> Fixture {
        let store = MemoryVlanAllocationStore::shared();
        let instances = MemoryServiceInstanceStore::shared();
        let settings = MemorySettingsStore::shared();
        let events = RecordingEventBus::shared();

        if let Some((start, end)) = pool {
            settings
                .put_many(&[
                    SettingRow::number(SETTINGS_NAMESPACE, POOL_START_KEY, i64::from(start)),
                    SettingRow::number(SETTINGS_NAMESPACE, POOL_END_KEY, i64::from(end)),
                ])
                .await
                .unwrap();
        }

        let allocator = VlanAllocator::new(
            store.clone(),
            instances.clone(),
            settings.clone(),
            events.clone(),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();

        Fixture {
            allocator,
            store,
            instances,
            settings,
            events,
            transport: StubRouterTransport::shared(),
        }
    }

    fn running_instance(instances: &MemoryServiceInstanceStore) -> InstanceId {
        let id = InstanceId::generate();
        instances.upsert(ServiceInstanceRow {
            id,
            name: "inst".to_string(),
            service_type: service("tor"),
            status: ServiceInstanceStatus::Running,
        });
        id
    }

    #[tokio::test]
    async fn defaults_are_seeded_into_settings() {
        let fx = fixture().await;
        let pool = fx.allocator.pool_config().await;
        assert_eq!((pool.start, pool.end), (100, 199));

        let stored = fx
            .settings
            .get(SETTINGS_NAMESPACE, POOL_START_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.as_i64(), Some(100));
        assert!(stored.editable);
        assert!(stored.requires_restart);
        assert_eq!(stored.value_type, "number");
    }

    #[tokio::test]
    async fn allocates_lowest_free_id_with_derived_subnet() {
        let fx = fixture().await;
        let lease = fx
            .allocator
            .allocate_vlan(
                &fx.transport,
                &router(),
                running_instance(&fx.instances),
                &service("tor"),
            )
            .await
            .unwrap();

        assert_eq!(lease.vlan_id.as_u16(), 100);
        assert_eq!(lease.subnet, "10.99.100.0/24");
    }

    #[tokio::test]
    async fn skips_ids_present_on_router() {
        let fx = fixture().await;
        let stub = StubRouterTransport::shared();
        stub.respond(
            "/interface/vlan",
            vec![
                crate::transport::row(&[("vlan-id", "100"), ("name", "vlan100")]),
                crate::transport::row(&[("vlan-id", "101"), ("name", "vlan101")]),
            ],
        );
        let transport: SharedRouterTransport = stub;

        let lease = fx
            .allocator
            .allocate_vlan(
                &transport,
                &router(),
                running_instance(&fx.instances),
                &service("tor"),
            )
            .await
            .unwrap();

        assert_eq!(lease.vlan_id.as_u16(), 102);
    }

    #[tokio::test]
    async fn router_query_failure_skips_candidates_fail_safe() {
        // With every candidate unverifiable the pool must exhaust rather
        // than hand out a possibly-conflicting ID.
        let fx = fixture_with_pool(Some((100, 102))).await;
        let stub = StubRouterTransport::shared();
        stub.fail_path("/interface/vlan");
        let transport: SharedRouterTransport = stub;

        let err = fx
            .allocator
            .allocate_vlan(
                &transport,
                &router(),
                running_instance(&fx.instances),
                &service("tor"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), codes::VLAN_POOL_EXHAUSTED);
    }

    #[tokio::test]
    async fn reserved_ids_are_skipped_inside_pool() {
        let fx = fixture_with_pool(Some((1, 3))).await;
        let lease = fx
            .allocator
            .allocate_vlan(
                &fx.transport,
                &router(),
                running_instance(&fx.instances),
                &service("tor"),
            )
            .await
            .unwrap();
        // VLAN 1 is 802.1Q-reserved.
        assert_eq!(lease.vlan_id.as_u16(), 2);

        let pool = fx.allocator.pool_config().await;
        assert_eq!(pool.capacity(), 2);
    }

    #[tokio::test]
    async fn pool_exhaustion_fails_after_capacity_allocations() {
        let fx = fixture_with_pool(Some((100, 104))).await;
        let r = router();

        for _ in 0..5 {
            fx.allocator
                .allocate_vlan(
                    &fx.transport,
                    &r,
                    running_instance(&fx.instances),
                    &service("tor"),
                )
                .await
                .unwrap();
        }

        let err = fx
            .allocator
            .allocate_vlan(
                &fx.transport,
                &r,
                running_instance(&fx.instances),
                &service("tor"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::VLAN_POOL_EXHAUSTED);
        assert_eq!(err.message(), "pool exhausted");
    }

    #[tokio::test]
    async fn release_marks_row_released_but_keeps_it() {
        let fx = fixture().await;
        let r = router();
        let lease = fx
            .allocator
            .allocate_vlan(
                &fx.transport,
                &r,
                running_instance(&fx.instances),
                &service("tor"),
            )
            .await
            .unwrap();

        fx.allocator.release_vlan(&r, lease.vlan_id).await.unwrap();

        let rows = fx.store.all_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, VlanAllocationStatus::Released);

        // The freed ID is the next allocation's first candidate again.
        let next = fx
            .allocator
            .allocate_vlan(
                &fx.transport,
                &r,
                running_instance(&fx.instances),
                &service("tor"),
            )
            .await
            .unwrap();
        assert_eq!(next.vlan_id, lease.vlan_id);
    }

    #[tokio::test]
    async fn release_of_unallocated_vlan_fails() {
        let fx = fixture().await;
        let err = fx
            .allocator
            .release_vlan(&router(), VlanId::try_new(150).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::RESOURCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn pool_status_accounting_holds() {
        let fx = fixture_with_pool(Some((100, 109))).await;
        let r = router();

        for _ in 0..3 {
            fx.allocator
                .allocate_vlan(
                    &fx.transport,
                    &r,
                    running_instance(&fx.instances),
                    &service("tor"),
                )
                .await
                .unwrap();
        }

        let status = fx.allocator.pool_status(&r).await;
        assert_eq!(status.total, 10);
        assert_eq!(status.allocated, 3);
        assert_eq!(status.available, 7);
        assert_eq!(status.allocated + status.available, status.total);
        assert!(!status.should_warn);
    }

    #[tokio::test]
    async fn warning_then_critical_events_as_pool_fills() {
        let fx = fixture_with_pool(Some((100, 109))).await;
        let r = router();

        for _ in 0..8 {
            fx.allocator
                .allocate_vlan(
                    &fx.transport,
                    &r,
                    running_instance(&fx.instances),
                    &service("tor"),
                )
                .await
                .unwrap();
        }

        let warnings = fx.events.events_of_type("vlan.pool.warning");
        assert!(!warnings.is_empty());
        let EventPayload::VlanPoolWarning(payload) = &warnings[0].payload else {
            panic!("wrong payload");
        };
        assert_eq!(payload.level, PoolWarningLevel::Warning);
        assert_eq!(payload.recommended_action, "cleanup");

        for _ in 0..2 {
            fx.allocator
                .allocate_vlan(
                    &fx.transport,
                    &r,
                    running_instance(&fx.instances),
                    &service("tor"),
                )
                .await
                .unwrap();
        }

        let warnings = fx.events.events_of_type("vlan.pool.warning");
        let critical = warnings
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::VlanPoolWarning(p) => Some(p),
                _ => None,
            })
            .find(|p| p.level == PoolWarningLevel::Critical)
            .expect("critical warning emitted");
        assert_eq!(critical.recommended_action, "expand_pool");

        assert!(
            fx.allocator
                .allocate_vlan(
                    &fx.transport,
                    &r,
                    running_instance(&fx.instances),
                    &service("tor"),
                )
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn update_pool_config_validates_bounds() {
        let fx = fixture().await;

        for (start, end) in [(0, 199), (100, 4095), (200, 100)] {
            let err = fx.allocator.update_pool_config(start, end).await.unwrap_err();
            assert_eq!(err.code(), codes::INVALID_POOL_CONFIG);
        }
    }

    #[tokio::test]
    async fn update_pool_config_rejects_stranding_allocations() {
        let fx = fixture().await;
        fx.allocator
            .allocate_vlan(
                &fx.transport,
                &router(),
                running_instance(&fx.instances),
                &service("tor"),
            )
            .await
            .unwrap();

        // VLAN 100 is allocated; a 150..199 pool would strand it.
        let err = fx
            .allocator
            .update_pool_config(150, 199)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_POOL_CONFIG);

        fx.allocator.update_pool_config(50, 199).await.unwrap();
        let pool = fx.allocator.pool_config().await;
        assert_eq!((pool.start, pool.end), (50, 199));
        assert_eq!(
            fx.settings
                .get(SETTINGS_NAMESPACE, POOL_START_KEY)
                .await
                .unwrap()
                .unwrap()
                .as_i64(),
            Some(50)
        );
    }

    #[tokio::test]
    async fn orphan_sweep_releases_rows_without_instances() {
        let fx = fixture().await;
        let r = router();

        let live = running_instance(&fx.instances);
        let gone = running_instance(&fx.instances);
        fx.allocator
            .allocate_vlan(&fx.transport, &r, live, &service("tor"))
            .await
            .unwrap();
        fx.allocator
            .allocate_vlan(&fx.transport, &r, gone, &service("tor"))
            .await
            .unwrap();
        fx.instances.remove(gone);

        let orphans = fx.allocator.detect_orphans(&r).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].instance_id, gone);

        let released = fx.allocator.cleanup_orphans(&r).await.unwrap();
        assert_eq!(released, 1);

        // Rows are retained, flipped to released.
        assert_eq!(fx.store.all_rows().len(), 2);
        let status = fx.allocator.pool_status(&r).await;
        assert_eq!(status.allocated, 1);
    }
}
