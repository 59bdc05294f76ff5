//! SQLite implementation of the VLAN allocation store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;
use uuid::Uuid;

use crate::database::{Database, map_sqlx_error};
use crate::domain_types::{AllocationId, InstanceId, RouterId, ServiceType, VlanId};
use crate::repository::{
    RepositoryError, RepositoryResult, VlanAllocationRow, VlanAllocationStatus,
    VlanAllocationStore,
};

const SELECT_COLUMNS: &str =
    "id, router_id, vlan_id, instance_id, service_type, subnet, status, created_at";

/// VLAN allocation rows persisted in the `vlan_allocations` table. A
/// partial unique index on (router_id, vlan_id) over allocated rows
/// enforces the single-holder invariant; released rows stay for audit.
#[derive(Debug, Clone)]
pub struct SqliteVlanAllocationStore {
    db: Database,
}

impl SqliteVlanAllocationStore {
    /// Creates a store over the shared database handle
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn decode(row: &SqliteRow) -> RepositoryResult<VlanAllocationRow> {
    let id: String = row.try_get("id").map_err(bad_row)?;
    let router_id: String = row.try_get("router_id").map_err(bad_row)?;
    let vlan_id: i64 = row.try_get("vlan_id").map_err(bad_row)?;
    let instance_id: String = row.try_get("instance_id").map_err(bad_row)?;
    let service_type: String = row.try_get("service_type").map_err(bad_row)?;
    let subnet: String = row.try_get("subnet").map_err(bad_row)?;
    let status: String = row.try_get("status").map_err(bad_row)?;
    let created_at: i64 = row.try_get("created_at").map_err(bad_row)?;

    Ok(VlanAllocationRow {
        id: AllocationId::new(parse_uuid(&id)?),
        router_id: RouterId::try_new(router_id)
            .map_err(|e| RepositoryError::backend(format!("bad router_id: {e}")))?,
        vlan_id: u16::try_from(vlan_id)
            .ok()
            .and_then(|v| VlanId::try_new(v).ok())
            .ok_or_else(|| RepositoryError::backend(format!("bad vlan_id: {vlan_id}")))?,
        instance_id: InstanceId::new(parse_uuid(&instance_id)?),
        service_type: ServiceType::try_new(service_type)
            .map_err(|e| RepositoryError::backend(format!("bad service_type: {e}")))?,
        subnet,
        status: status
            .parse::<VlanAllocationStatus>()
            .map_err(RepositoryError::backend)?,
        created_at: DateTime::<Utc>::from_timestamp(created_at, 0)
            .ok_or_else(|| RepositoryError::backend(format!("bad created_at: {created_at}")))?,
    })
}

fn parse_uuid(value: &str) -> RepositoryResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| RepositoryError::backend(format!("bad uuid: {e}")))
}

fn bad_row(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Backend {
        message: "failed to decode vlan allocation row".to_string(),
        source: Some(Box::new(err)),
    }
}

#[async_trait]
impl VlanAllocationStore for SqliteVlanAllocationStore {
    async fn list_allocated(&self) -> RepositoryResult<Vec<VlanAllocationRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM vlan_allocations WHERE status = 'allocated'"
        ))
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "list allocated vlans"))?;
        rows.iter().map(decode).collect()
    }

    async fn list_allocated_for_router(
        &self,
        router_id: &RouterId,
    ) -> RepositoryResult<Vec<VlanAllocationRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM vlan_allocations \
             WHERE router_id = ?1 AND status = 'allocated' ORDER BY vlan_id"
        ))
        .bind(router_id.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "list allocated vlans for router"))?;
        rows.iter().map(decode).collect()
    }

    async fn list_for_router(
        &self,
        router_id: &RouterId,
    ) -> RepositoryResult<Vec<VlanAllocationRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM vlan_allocations WHERE router_id = ?1 ORDER BY vlan_id"
        ))
        .bind(router_id.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "list vlans for router"))?;
        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self, allocation), fields(router_id = %allocation.router_id, vlan_id = %allocation.vlan_id))]
    async fn insert(&self, allocation: &VlanAllocationRow) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO vlan_allocations \
             (id, router_id, vlan_id, instance_id, service_type, subnet, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(allocation.id.to_string())
        .bind(allocation.router_id.as_str())
        .bind(i64::from(allocation.vlan_id.as_u16()))
        .bind(allocation.instance_id.to_string())
        .bind(allocation.service_type.as_str())
        .bind(&allocation.subnet)
        .bind(allocation.status.as_str())
        .bind(allocation.created_at.timestamp())
        .execute(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "insert vlan allocation"))?;
        Ok(())
    }

    async fn exists_allocated(
        &self,
        router_id: &RouterId,
        vlan_id: VlanId,
    ) -> RepositoryResult<bool> {
        let found: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM vlan_allocations \
             WHERE router_id = ?1 AND vlan_id = ?2 AND status = 'allocated'",
        )
        .bind(router_id.as_str())
        .bind(i64::from(vlan_id.as_u16()))
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "check vlan allocation"))?;
        Ok(found.is_some())
    }

    async fn mark_released(
        &self,
        router_id: &RouterId,
        vlan_id: VlanId,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE vlan_allocations SET status = 'released' \
             WHERE router_id = ?1 AND vlan_id = ?2 AND status = 'allocated'",
        )
        .bind(router_id.as_str())
        .bind(i64::from(vlan_id.as_u16()))
        .execute(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "release vlan allocation"))?;
        Ok(result.rows_affected() > 0)
    }
}
