//! SQLite implementation of the read-only service instance view

use async_trait::async_trait;
use sqlx::Row;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::database::{Database, map_sqlx_error};
use crate::domain_types::{InstanceId, ServiceType};
use crate::repository::{
    RepositoryError, RepositoryResult, ServiceInstanceRow, ServiceInstanceStatus,
    ServiceInstanceStore,
};

/// Read-only lookups against the `service_instances` table.
///
/// The core only reads this collection (orphan detection); writes belong
/// to the provisioning layer. The concrete type still exposes `upsert`
/// so that layer, and tests, can seed rows through the same handle.
#[derive(Debug, Clone)]
pub struct SqliteServiceInstanceStore {
    db: Database,
}

impl SqliteServiceInstanceStore {
    /// Creates a store over the shared database handle
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or replaces an instance row.
    pub async fn upsert(&self, instance: &ServiceInstanceRow) -> RepositoryResult<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        sqlx::query(
            "INSERT INTO service_instances (id, name, service_type, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (id) DO UPDATE SET \
             name = excluded.name, service_type = excluded.service_type, \
             status = excluded.status",
        )
        .bind(instance.id.to_string())
        .bind(&instance.name)
        .bind(instance.service_type.as_str())
        .bind(instance.status.as_str())
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "upsert service instance"))?;
        Ok(())
    }

    /// Deletes an instance row; returns whether one was removed.
    pub async fn remove(&self, id: InstanceId) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM service_instances WHERE id = ?1")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error(e, "remove service instance"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ServiceInstanceStore for SqliteServiceInstanceStore {
    async fn find(&self, id: InstanceId) -> RepositoryResult<Option<ServiceInstanceRow>> {
        let row = sqlx::query(
            "SELECT id, name, service_type, status FROM service_instances WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "find service instance"))?;

        row.map(|row| {
            let id: String = row.try_get("id").map_err(bad_row)?;
            let name: String = row.try_get("name").map_err(bad_row)?;
            let service_type: String = row.try_get("service_type").map_err(bad_row)?;
            let status: String = row.try_get("status").map_err(bad_row)?;

            Ok(ServiceInstanceRow {
                id: InstanceId::new(
                    Uuid::parse_str(&id)
                        .map_err(|e| RepositoryError::backend(format!("bad uuid: {e}")))?,
                ),
                name,
                service_type: ServiceType::try_new(service_type)
                    .map_err(|e| RepositoryError::backend(format!("bad service_type: {e}")))?,
                status: status
                    .parse::<ServiceInstanceStatus>()
                    .map_err(RepositoryError::backend)?,
            })
        })
        .transpose()
    }
}

fn bad_row(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Backend {
        message: "failed to decode service instance row".to_string(),
        source: Some(Box::new(err)),
    }
}
