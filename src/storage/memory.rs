//! In-memory repository implementations
//!
//! Back the unit tests and ephemeral (demo/preview) deployments. They
//! enforce the same uniqueness rules as the SQLite stores so allocator
//! behavior is identical against either.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain_types::{
    AllocationId, InstanceId, PortNumber, PortProtocol, RouterId, VlanId,
};
use crate::repository::{
    PortAllocationRow, PortAllocationStore, RepositoryError, RepositoryResult,
    ServiceInstanceRow, ServiceInstanceStore, SettingRow, SettingsStore, VlanAllocationRow,
    VlanAllocationStatus, VlanAllocationStore,
};

/// Port allocations held in a vector behind a mutex
#[derive(Debug, Default)]
pub struct MemoryPortAllocationStore {
    rows: Mutex<Vec<PortAllocationRow>>,
}

impl MemoryPortAllocationStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared empty store
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PortAllocationRow>> {
        self.rows.lock().expect("store lock poisoned")
    }
}

#[async_trait]
impl PortAllocationStore for MemoryPortAllocationStore {
    async fn list_all(&self) -> RepositoryResult<Vec<PortAllocationRow>> {
        Ok(self.lock().clone())
    }

    async fn list_for_router(
        &self,
        router_id: &RouterId,
    ) -> RepositoryResult<Vec<PortAllocationRow>> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| &r.router_id == router_id)
            .cloned()
            .collect())
    }

    async fn list_for_instance(
        &self,
        instance_id: InstanceId,
    ) -> RepositoryResult<Vec<PortAllocationRow>> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn insert(&self, allocation: &PortAllocationRow) -> RepositoryResult<()> {
        let mut rows = self.lock();
        let taken = rows.iter().any(|r| {
            r.router_id == allocation.router_id
                && r.port == allocation.port
                && r.protocol == allocation.protocol
        });
        if taken {
            return Err(RepositoryError::UniqueViolation {
                constraint: "port_allocations (router_id, port, protocol)".to_string(),
            });
        }
        rows.push(allocation.clone());
        Ok(())
    }

    async fn remove(
        &self,
        router_id: &RouterId,
        port: PortNumber,
        protocol: PortProtocol,
    ) -> RepositoryResult<bool> {
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|r| {
            !(&r.router_id == router_id && r.port == port && r.protocol == protocol)
        });
        Ok(rows.len() < before)
    }

    async fn remove_by_id(&self, id: AllocationId) -> RepositoryResult<bool> {
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() < before)
    }

    async fn exists(
        &self,
        router_id: &RouterId,
        port: PortNumber,
        protocol: PortProtocol,
    ) -> RepositoryResult<bool> {
        Ok(self.lock().iter().any(|r| {
            &r.router_id == router_id && r.port == port && r.protocol == protocol
        }))
    }

    async fn max_port(
        &self,
        router_id: &RouterId,
        protocol: PortProtocol,
    ) -> RepositoryResult<Option<u16>> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| &r.router_id == router_id && r.protocol == protocol)
            .map(|r| r.port.as_u16())
            .max())
    }

    async fn count(&self) -> RepositoryResult<u64> {
        Ok(self.lock().len() as u64)
    }
}

/// VLAN allocations held in a vector behind a mutex
#[derive(Debug, Default)]
pub struct MemoryVlanAllocationStore {
    rows: Mutex<Vec<VlanAllocationRow>>,
}

impl MemoryVlanAllocationStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared empty store
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Every row regardless of status, for audit assertions
    pub fn all_rows(&self) -> Vec<VlanAllocationRow> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<VlanAllocationRow>> {
        self.rows.lock().expect("store lock poisoned")
    }
}

#[async_trait]
impl VlanAllocationStore for MemoryVlanAllocationStore {
    async fn list_allocated(&self) -> RepositoryResult<Vec<VlanAllocationRow>> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.status == VlanAllocationStatus::Allocated)
            .cloned()
            .collect())
    }

    async fn list_allocated_for_router(
        &self,
        router_id: &RouterId,
    ) -> RepositoryResult<Vec<VlanAllocationRow>> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| {
                &r.router_id == router_id && r.status == VlanAllocationStatus::Allocated
            })
            .cloned()
            .collect())
    }

    async fn list_for_router(
        &self,
        router_id: &RouterId,
    ) -> RepositoryResult<Vec<VlanAllocationRow>> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| &r.router_id == router_id)
            .cloned()
            .collect())
    }

    async fn insert(&self, allocation: &VlanAllocationRow) -> RepositoryResult<()> {
        let mut rows = self.lock();
        let taken = rows.iter().any(|r| {
            r.router_id == allocation.router_id
                && r.vlan_id == allocation.vlan_id
                && r.status == VlanAllocationStatus::Allocated
        });
        if taken && allocation.status == VlanAllocationStatus::Allocated {
            return Err(RepositoryError::UniqueViolation {
                constraint: "vlan_allocations (router_id, vlan_id) where allocated".to_string(),
            });
        }
        rows.push(allocation.clone());
        Ok(())
    }

    async fn exists_allocated(
        &self,
        router_id: &RouterId,
        vlan_id: VlanId,
    ) -> RepositoryResult<bool> {
        Ok(self.lock().iter().any(|r| {
            &r.router_id == router_id
                && r.vlan_id == vlan_id
                && r.status == VlanAllocationStatus::Allocated
        }))
    }

    async fn mark_released(
        &self,
        router_id: &RouterId,
        vlan_id: VlanId,
    ) -> RepositoryResult<bool> {
        let mut rows = self.lock();
        for row in rows.iter_mut() {
            if &row.router_id == router_id
                && row.vlan_id == vlan_id
                && row.status == VlanAllocationStatus::Allocated
            {
                row.status = VlanAllocationStatus::Released;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Settings held in a map behind a mutex
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    rows: Mutex<HashMap<(String, String), SettingRow>>,
}

impl MemorySettingsStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared empty store
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, namespace: &str, key: &str) -> RepositoryResult<Option<SettingRow>> {
        Ok(self
            .rows
            .lock()
            .expect("store lock poisoned")
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, setting: &SettingRow) -> RepositoryResult<()> {
        self.rows.lock().expect("store lock poisoned").insert(
            (setting.namespace.clone(), setting.key.clone()),
            setting.clone(),
        );
        Ok(())
    }

    async fn put_many(&self, settings: &[SettingRow]) -> RepositoryResult<()> {
        let mut rows = self.rows.lock().expect("store lock poisoned");
        for setting in settings {
            rows.insert(
                (setting.namespace.clone(), setting.key.clone()),
                setting.clone(),
            );
        }
        Ok(())
    }
}

/// Service instances held in a map behind a mutex
#[derive(Debug, Default)]
pub struct MemoryServiceInstanceStore {
    rows: Mutex<HashMap<InstanceId, ServiceInstanceRow>>,
}

impl MemoryServiceInstanceStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared empty store
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seeds or replaces an instance row
    pub fn upsert(&self, instance: ServiceInstanceRow) {
        self.rows
            .lock()
            .expect("store lock poisoned")
            .insert(instance.id, instance);
    }

    /// Removes an instance row
    pub fn remove(&self, id: InstanceId) {
        self.rows.lock().expect("store lock poisoned").remove(&id);
    }
}

#[async_trait]
impl ServiceInstanceStore for MemoryServiceInstanceStore {
    async fn find(&self, id: InstanceId) -> RepositoryResult<Option<ServiceInstanceRow>> {
        Ok(self
            .rows
            .lock()
            .expect("store lock poisoned")
            .get(&id)
            .cloned())
    }
}
