//! Repository ports
//!
//! Abstract row stores consumed by the allocators and the capability
//! service. The persistence engine itself is out of scope for the core;
//! SQLite implementations live in [`crate::storage`] and in-memory
//! implementations back the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{
    AllocationId, InstanceId, PortNumber, PortProtocol, RouterId, ServiceType, VlanId,
};

/// Errors surfaced by repository implementations.
///
/// Unique-constraint violations are distinguishable so allocators can
/// translate them into the typed "conflict; retry" error.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("row not found: {entity}")]
    NotFound { entity: String },

    #[error("storage backend failure: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl RepositoryError {
    /// Backend failure without an underlying error value
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

/// Result alias for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// One allocated (router, port, protocol) tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortAllocationRow {
    pub id: AllocationId,
    pub router_id: RouterId,
    pub port: PortNumber,
    pub protocol: PortProtocol,
    pub instance_id: InstanceId,
    pub service_type: ServiceType,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a VLAN allocation row. Released rows stay in the
/// store for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlanAllocationStatus {
    Allocated,
    Released,
}

impl VlanAllocationStatus {
    /// Store spelling of the status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allocated => "allocated",
            Self::Released => "released",
        }
    }
}

impl std::str::FromStr for VlanAllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allocated" => Ok(Self::Allocated),
            "released" => Ok(Self::Released),
            other => Err(format!("unknown vlan allocation status: {other}")),
        }
    }
}

/// One VLAN allocation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlanAllocationRow {
    pub id: AllocationId,
    pub router_id: RouterId,
    pub vlan_id: VlanId,
    pub instance_id: InstanceId,
    pub service_type: ServiceType,
    pub subnet: String,
    pub status: VlanAllocationStatus,
    pub created_at: DateTime<Utc>,
}

/// A typed value in the namespaced key-value settings store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingRow {
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    pub value_type: String,
    pub editable: bool,
    pub requires_restart: bool,
}

impl SettingRow {
    /// An editable, restart-requiring numeric setting
    pub fn number(namespace: &str, key: &str, value: i64) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: serde_json::Value::from(value),
            value_type: "number".to_string(),
            editable: true,
            requires_restart: true,
        }
    }

    /// The value as an integer, if it is one
    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_i64()
    }
}

/// Status of a service instance, as read through the read-only port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceInstanceStatus {
    Provisioning,
    Running,
    Stopped,
    Deleting,
}

impl ServiceInstanceStatus {
    /// Store spelling of the status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deleting => "deleting",
        }
    }
}

impl std::str::FromStr for ServiceInstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(Self::Provisioning),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "deleting" => Ok(Self::Deleting),
            other => Err(format!("unknown service instance status: {other}")),
        }
    }
}

/// A service instance as seen by the allocators' orphan sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstanceRow {
    pub id: InstanceId,
    pub name: String,
    pub service_type: ServiceType,
    pub status: ServiceInstanceStatus,
}

/// Store of port allocation rows, unique on (router, port, protocol).
#[async_trait]
pub trait PortAllocationStore: Send + Sync {
    /// Every allocation row; used to warm the registry cache at startup.
    async fn list_all(&self) -> RepositoryResult<Vec<PortAllocationRow>>;

    /// Allocations belonging to one router.
    async fn list_for_router(&self, router_id: &RouterId)
    -> RepositoryResult<Vec<PortAllocationRow>>;

    /// Allocations belonging to one service instance.
    async fn list_for_instance(
        &self,
        instance_id: InstanceId,
    ) -> RepositoryResult<Vec<PortAllocationRow>>;

    /// Inserts a new allocation; unique violation when the tuple is taken.
    async fn insert(&self, allocation: &PortAllocationRow) -> RepositoryResult<()>;

    /// Deletes by tuple; returns whether a row was removed.
    async fn remove(
        &self,
        router_id: &RouterId,
        port: PortNumber,
        protocol: PortProtocol,
    ) -> RepositoryResult<bool>;

    /// Deletes by allocation id; returns whether a row was removed.
    async fn remove_by_id(&self, id: AllocationId) -> RepositoryResult<bool>;

    /// Whether the tuple is already allocated.
    async fn exists(
        &self,
        router_id: &RouterId,
        port: PortNumber,
        protocol: PortProtocol,
    ) -> RepositoryResult<bool>;

    /// Highest allocated port for the router/protocol pair, if any.
    async fn max_port(
        &self,
        router_id: &RouterId,
        protocol: PortProtocol,
    ) -> RepositoryResult<Option<u16>>;

    /// Number of allocation rows in the store.
    async fn count(&self) -> RepositoryResult<u64>;
}

/// Store of VLAN allocation rows; at most one `allocated` row per
/// (router, vlan).
#[async_trait]
pub trait VlanAllocationStore: Send + Sync {
    /// Every row with status `allocated`.
    async fn list_allocated(&self) -> RepositoryResult<Vec<VlanAllocationRow>>;

    /// Allocated rows belonging to one router.
    async fn list_allocated_for_router(
        &self,
        router_id: &RouterId,
    ) -> RepositoryResult<Vec<VlanAllocationRow>>;

    /// Every row for a router regardless of status; audit queries.
    async fn list_for_router(&self, router_id: &RouterId)
    -> RepositoryResult<Vec<VlanAllocationRow>>;

    /// Inserts a new allocation; unique violation when the (router, vlan)
    /// pair already has an allocated row.
    async fn insert(&self, allocation: &VlanAllocationRow) -> RepositoryResult<()>;

    /// Whether the pair currently has an allocated row.
    async fn exists_allocated(
        &self,
        router_id: &RouterId,
        vlan_id: VlanId,
    ) -> RepositoryResult<bool>;

    /// Flips an allocated row to released; returns whether a row changed.
    /// The row is retained.
    async fn mark_released(&self, router_id: &RouterId, vlan_id: VlanId)
    -> RepositoryResult<bool>;
}

/// Namespaced key-value settings store.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Reads one setting.
    async fn get(&self, namespace: &str, key: &str) -> RepositoryResult<Option<SettingRow>>;

    /// Writes one setting, replacing any previous value.
    async fn put(&self, setting: &SettingRow) -> RepositoryResult<()>;

    /// Writes several settings atomically; either all land or none do.
    async fn put_many(&self, settings: &[SettingRow]) -> RepositoryResult<()>;
}

/// Read-only view of service instances, used for orphan detection.
#[async_trait]
pub trait ServiceInstanceStore: Send + Sync {
    /// Looks up one instance.
    async fn find(&self, id: InstanceId) -> RepositoryResult<Option<ServiceInstanceRow>>;
}
