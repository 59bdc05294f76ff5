//! SQLite implementation of the port allocation store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;
use uuid::Uuid;

use crate::database::{Database, map_sqlx_error};
use crate::domain_types::{
    AllocationId, InstanceId, PortNumber, PortProtocol, RouterId, ServiceType,
};
use crate::repository::{
    PortAllocationRow, PortAllocationStore, RepositoryError, RepositoryResult,
};

const SELECT_COLUMNS: &str =
    "id, router_id, port, protocol, instance_id, service_type, notes, created_at";

/// Port allocation rows persisted in the `port_allocations` table. The
/// table's unique index on (router_id, port, protocol) is the final
/// arbiter under contention.
#[derive(Debug, Clone)]
pub struct SqlitePortAllocationStore {
    db: Database,
}

impl SqlitePortAllocationStore {
    /// Creates a store over the shared database handle
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn decode(row: &SqliteRow) -> RepositoryResult<PortAllocationRow> {
    let id: String = row.try_get("id").map_err(bad_row)?;
    let router_id: String = row.try_get("router_id").map_err(bad_row)?;
    let port: i64 = row.try_get("port").map_err(bad_row)?;
    let protocol: String = row.try_get("protocol").map_err(bad_row)?;
    let instance_id: String = row.try_get("instance_id").map_err(bad_row)?;
    let service_type: String = row.try_get("service_type").map_err(bad_row)?;
    let notes: Option<String> = row.try_get("notes").map_err(bad_row)?;
    let created_at: i64 = row.try_get("created_at").map_err(bad_row)?;

    Ok(PortAllocationRow {
        id: AllocationId::new(parse_uuid(&id)?),
        router_id: RouterId::try_new(router_id)
            .map_err(|e| RepositoryError::backend(format!("bad router_id: {e}")))?,
        port: u16::try_from(port)
            .ok()
            .and_then(|p| PortNumber::try_new(p).ok())
            .ok_or_else(|| RepositoryError::backend(format!("bad port: {port}")))?,
        protocol: protocol
            .parse::<PortProtocol>()
            .map_err(|e| RepositoryError::backend(e.to_string()))?,
        instance_id: InstanceId::new(parse_uuid(&instance_id)?),
        service_type: ServiceType::try_new(service_type)
            .map_err(|e| RepositoryError::backend(format!("bad service_type: {e}")))?,
        notes,
        created_at: DateTime::<Utc>::from_timestamp(created_at, 0)
            .ok_or_else(|| RepositoryError::backend(format!("bad created_at: {created_at}")))?,
    })
}

fn parse_uuid(value: &str) -> RepositoryResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| RepositoryError::backend(format!("bad uuid: {e}")))
}

fn bad_row(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Backend {
        message: "failed to decode port allocation row".to_string(),
        source: Some(Box::new(err)),
    }
}

#[async_trait]
impl PortAllocationStore for SqlitePortAllocationStore {
    async fn list_all(&self) -> RepositoryResult<Vec<PortAllocationRow>> {
        let rows = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM port_allocations"))
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error(e, "list port allocations"))?;
        rows.iter().map(decode).collect()
    }

    async fn list_for_router(
        &self,
        router_id: &RouterId,
    ) -> RepositoryResult<Vec<PortAllocationRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM port_allocations WHERE router_id = ?1 ORDER BY port"
        ))
        .bind(router_id.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "list port allocations for router"))?;
        rows.iter().map(decode).collect()
    }

    async fn list_for_instance(
        &self,
        instance_id: InstanceId,
    ) -> RepositoryResult<Vec<PortAllocationRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM port_allocations WHERE instance_id = ?1 ORDER BY port"
        ))
        .bind(instance_id.to_string())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "list port allocations for instance"))?;
        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self, allocation), fields(router_id = %allocation.router_id, port = %allocation.port))]
    async fn insert(&self, allocation: &PortAllocationRow) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO port_allocations \
             (id, router_id, port, protocol, instance_id, service_type, notes, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(allocation.id.to_string())
        .bind(allocation.router_id.as_str())
        .bind(i64::from(allocation.port.as_u16()))
        .bind(allocation.protocol.as_str())
        .bind(allocation.instance_id.to_string())
        .bind(allocation.service_type.as_str())
        .bind(allocation.notes.as_deref())
        .bind(allocation.created_at.timestamp())
        .execute(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "insert port allocation"))?;
        Ok(())
    }

    async fn remove(
        &self,
        router_id: &RouterId,
        port: PortNumber,
        protocol: PortProtocol,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "DELETE FROM port_allocations WHERE router_id = ?1 AND port = ?2 AND protocol = ?3",
        )
        .bind(router_id.as_str())
        .bind(i64::from(port.as_u16()))
        .bind(protocol.as_str())
        .execute(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "remove port allocation"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_by_id(&self, id: AllocationId) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM port_allocations WHERE id = ?1")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error(e, "remove port allocation by id"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(
        &self,
        router_id: &RouterId,
        port: PortNumber,
        protocol: PortProtocol,
    ) -> RepositoryResult<bool> {
        let found: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM port_allocations WHERE router_id = ?1 AND port = ?2 AND protocol = ?3",
        )
        .bind(router_id.as_str())
        .bind(i64::from(port.as_u16()))
        .bind(protocol.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "check port allocation"))?;
        Ok(found.is_some())
    }

    async fn max_port(
        &self,
        router_id: &RouterId,
        protocol: PortProtocol,
    ) -> RepositoryResult<Option<u16>> {
        let max: (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(port) FROM port_allocations WHERE router_id = ?1 AND protocol = ?2",
        )
        .bind(router_id.as_str())
        .bind(protocol.as_str())
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "aggregate max port"))?;
        Ok(max.0.and_then(|p| u16::try_from(p).ok()))
    }

    async fn count(&self) -> RepositoryResult<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM port_allocations")
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error(e, "count port allocations"))?;
        Ok(u64::try_from(count.0).unwrap_or(0))
    }
}
