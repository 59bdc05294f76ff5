//! VLAN pool lifecycle over the SQLite store: fill-up warnings, exhaustion,
//! release auditing, and the pool-status accounting invariant.

use std::sync::Arc;

use nasnet_core::database::Database;
use nasnet_core::events::{EventPayload, PoolWarningLevel, RecordingEventBus};
use nasnet_core::repository::{
    ServiceInstanceRow, ServiceInstanceStatus, SettingRow, SettingsStore, VlanAllocationStatus,
    VlanAllocationStore,
};
use nasnet_core::storage::{
    SqliteServiceInstanceStore, SqliteSettingsStore, SqliteVlanAllocationStore,
};
use nasnet_core::time_provider::SystemClock;
use nasnet_core::transport::{SharedRouterTransport, StubRouterTransport};
use nasnet_core::vlan_allocator::{POOL_END_KEY, POOL_START_KEY, SETTINGS_NAMESPACE};
use nasnet_core::{InstanceId, RouterId, ServiceType, VlanAllocator};

fn router(name: &str) -> RouterId {
    RouterId::try_new(name.to_string()).unwrap()
}

fn service(name: &str) -> ServiceType {
    ServiceType::try_new(name.to_string()).unwrap()
}

struct Fixture {
    allocator: VlanAllocator,
    store: Arc<SqliteVlanAllocationStore>,
    instances: Arc<SqliteServiceInstanceStore>,
    events: Arc<RecordingEventBus>,
    transport: SharedRouterTransport,
}

async fn fixture(pool: Option<(u16, u16)>) -> Fixture {
    let db = Database::in_memory().await.unwrap();
    let store = Arc::new(SqliteVlanAllocationStore::new(db.clone()));
    let instances = Arc::new(SqliteServiceInstanceStore::new(db.clone()));
    let settings = Arc::new(SqliteSettingsStore::new(db));
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
        settings,
        events.clone(),
        SystemClock::shared(),
    )
    .await
    .unwrap();

    Fixture {
        allocator,
        store,
        instances,
        events,
        transport: StubRouterTransport::shared(),
    }
}

async fn running_instance(instances: &SqliteServiceInstanceStore) -> InstanceId {
    let id = InstanceId::generate();
    instances
        .upsert(&ServiceInstanceRow {
            id,
            name: format!("inst-{id}"),
            service_type: service("tor"),
            status: ServiceInstanceStatus::Running,
        })
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn filling_the_pool_warns_then_goes_critical_then_fails() {
    let fx = fixture(Some((100, 109))).await;
    let rtr = router("rtr-1");

    for _ in 0..8 {
        let instance = running_instance(&fx.instances).await;
        fx.allocator
            .allocate_vlan(&fx.transport, &rtr, instance, &service("tor"))
            .await
            .unwrap();
    }

    // 8/10 = 80% utilization: at least one warning-level event.
    let levels: Vec<PoolWarningLevel> = fx
        .events
        .events_of_type("vlan.pool.warning")
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::VlanPoolWarning(p) => Some(p.level),
            _ => None,
        })
        .collect();
    assert!(levels.contains(&PoolWarningLevel::Warning));
    assert!(!levels.contains(&PoolWarningLevel::Critical));

    for _ in 0..2 {
        let instance = running_instance(&fx.instances).await;
        fx.allocator
            .allocate_vlan(&fx.transport, &rtr, instance, &service("tor"))
            .await
            .unwrap();
    }

    let levels: Vec<PoolWarningLevel> = fx
        .events
        .events_of_type("vlan.pool.warning")
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::VlanPoolWarning(p) => Some(p.level),
            _ => None,
        })
        .collect();
    assert!(levels.contains(&PoolWarningLevel::Critical));

    // Eleventh allocation: pool exhausted.
    let instance = running_instance(&fx.instances).await;
    let err = fx
        .allocator
        .allocate_vlan(&fx.transport, &rtr, instance, &service("tor"))
        .await
        .unwrap_err();
    assert_eq!(err.message(), "pool exhausted");
}

#[tokio::test]
async fn pool_status_accounting_holds_across_allocate_and_release() {
    let fx = fixture(Some((100, 109))).await;
    let rtr = router("rtr-1");

    let mut leases = Vec::new();
    for _ in 0..6 {
        let instance = running_instance(&fx.instances).await;
        leases.push(
            fx.allocator
                .allocate_vlan(&fx.transport, &rtr, instance, &service("tor"))
                .await
                .unwrap(),
        );
    }
    for lease in leases.drain(..3) {
        fx.allocator.release_vlan(&rtr, lease.vlan_id).await.unwrap();
    }

    let status = fx.allocator.pool_status(&rtr).await;
    assert_eq!(status.total, 10);
    assert_eq!(status.allocated, 3);
    assert_eq!(status.allocated + status.available, status.total);
}

#[tokio::test]
async fn vlan_ids_are_sequential_with_derived_subnets() {
    let fx = fixture(None).await;
    let rtr = router("rtr-1");

    for expected in [100u16, 101, 102] {
        let instance = running_instance(&fx.instances).await;
        let lease = fx
            .allocator
            .allocate_vlan(&fx.transport, &rtr, instance, &service("singbox"))
            .await
            .unwrap();
        assert_eq!(lease.vlan_id.as_u16(), expected);
        assert_eq!(lease.subnet, format!("10.99.{expected}.0/24"));
    }
}

#[tokio::test]
async fn released_rows_are_retained_for_audit() {
    let fx = fixture(None).await;
    let rtr = router("rtr-1");
    let instance = running_instance(&fx.instances).await;

    let lease = fx
        .allocator
        .allocate_vlan(&fx.transport, &rtr, instance, &service("tor"))
        .await
        .unwrap();
    fx.allocator.release_vlan(&rtr, lease.vlan_id).await.unwrap();

    let all = fx.store.list_for_router(&rtr).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, VlanAllocationStatus::Released);

    let allocated = fx.store.list_allocated_for_router(&rtr).await.unwrap();
    assert!(allocated.is_empty());
}

#[tokio::test]
async fn store_partial_unique_index_allows_reallocation_after_release() {
    use chrono::Utc;
    use nasnet_core::domain_types::{AllocationId, VlanId};
    use nasnet_core::repository::{RepositoryError, VlanAllocationRow};

    let fx = fixture(None).await;
    let rtr = router("rtr-1");
    let instance = running_instance(&fx.instances).await;

    let row = VlanAllocationRow {
        id: AllocationId::generate(),
        router_id: rtr.clone(),
        vlan_id: VlanId::try_new(120).unwrap(),
        instance_id: instance,
        service_type: service("tor"),
        subnet: "10.99.120.0/24".to_string(),
        status: VlanAllocationStatus::Allocated,
        created_at: Utc::now(),
    };
    fx.store.insert(&row).await.unwrap();

    // A second allocated row for the same pair violates the partial index.
    let mut duplicate = row.clone();
    duplicate.id = AllocationId::generate();
    let err = fx.store.insert(&duplicate).await.unwrap_err();
    assert!(matches!(err, RepositoryError::UniqueViolation { .. }));

    // After release the pair is insertable again, and both rows remain.
    fx.store
        .mark_released(&rtr, VlanId::try_new(120).unwrap())
        .await
        .unwrap();
    fx.store.insert(&duplicate).await.unwrap();
    assert_eq!(fx.store.list_for_router(&rtr).await.unwrap().len(), 2);
}

#[tokio::test]
async fn pool_reconfiguration_persists_and_rejects_stranding() {
    let fx = fixture(None).await;
    let rtr = router("rtr-1");
    let instance = running_instance(&fx.instances).await;

    fx.allocator
        .allocate_vlan(&fx.transport, &rtr, instance, &service("tor"))
        .await
        .unwrap();

    // VLAN 100 is held; shrinking past it must fail.
    assert!(fx.allocator.update_pool_config(150, 199).await.is_err());

    fx.allocator.update_pool_config(90, 210).await.unwrap();
    let pool = fx.allocator.pool_config().await;
    assert_eq!((pool.start, pool.end), (90, 210));
}

#[tokio::test]
async fn orphaned_vlans_are_released_not_deleted() {
    let fx = fixture(None).await;
    let rtr = router("rtr-1");

    let live = running_instance(&fx.instances).await;
    let gone = running_instance(&fx.instances).await;
    fx.allocator
        .allocate_vlan(&fx.transport, &rtr, live, &service("tor"))
        .await
        .unwrap();
    fx.allocator
        .allocate_vlan(&fx.transport, &rtr, gone, &service("tor"))
        .await
        .unwrap();

    fx.instances.remove(gone).await.unwrap();

    assert_eq!(fx.allocator.cleanup_orphans(&rtr).await.unwrap(), 1);

    let all = fx.store.list_for_router(&rtr).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(
        all.iter()
            .filter(|r| r.status == VlanAllocationStatus::Released)
            .count(),
        1
    );
}
