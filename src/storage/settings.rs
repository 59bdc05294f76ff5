//! SQLite implementation of the settings store

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::database::{Database, map_sqlx_error};
use crate::repository::{RepositoryError, RepositoryResult, SettingRow, SettingsStore};

/// Namespaced key-value settings persisted in the `settings` table.
/// Values are stored as JSON text alongside their declared type.
#[derive(Debug, Clone)]
pub struct SqliteSettingsStore {
    db: Database,
}

impl SqliteSettingsStore {
    /// Creates a store over the shared database handle
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn now_unix() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

fn decode(row: &SqliteRow) -> RepositoryResult<SettingRow> {
    let namespace: String = row.try_get("namespace").map_err(bad_row)?;
    let key: String = row.try_get("key").map_err(bad_row)?;
    let value: String = row.try_get("value").map_err(bad_row)?;
    let value_type: String = row.try_get("value_type").map_err(bad_row)?;
    let editable: i64 = row.try_get("editable").map_err(bad_row)?;
    let requires_restart: i64 = row.try_get("requires_restart").map_err(bad_row)?;

    Ok(SettingRow {
        namespace,
        key,
        value: serde_json::from_str(&value)
            .map_err(|e| RepositoryError::backend(format!("bad setting value: {e}")))?,
        value_type,
        editable: editable != 0,
        requires_restart: requires_restart != 0,
    })
}

fn bad_row(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Backend {
        message: "failed to decode setting row".to_string(),
        source: Some(Box::new(err)),
    }
}

const UPSERT: &str = "INSERT INTO settings \
     (namespace, key, value, value_type, editable, requires_restart, updated_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
     ON CONFLICT (namespace, key) DO UPDATE SET \
     value = excluded.value, value_type = excluded.value_type, \
     editable = excluded.editable, requires_restart = excluded.requires_restart, \
     updated_at = excluded.updated_at";

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get(&self, namespace: &str, key: &str) -> RepositoryResult<Option<SettingRow>> {
        let row = sqlx::query(
            "SELECT namespace, key, value, value_type, editable, requires_restart \
             FROM settings WHERE namespace = ?1 AND key = ?2",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error(e, "get setting"))?;
        row.as_ref().map(decode).transpose()
    }

    async fn put(&self, setting: &SettingRow) -> RepositoryResult<()> {
        let value = serde_json::to_string(&setting.value)
            .map_err(|e| RepositoryError::backend(format!("unserializable setting: {e}")))?;
        sqlx::query(UPSERT)
            .bind(&setting.namespace)
            .bind(&setting.key)
            .bind(value)
            .bind(&setting.value_type)
            .bind(i64::from(setting.editable))
            .bind(i64::from(setting.requires_restart))
            .bind(Self::now_unix())
            .execute(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error(e, "put setting"))?;
        Ok(())
    }

    async fn put_many(&self, settings: &[SettingRow]) -> RepositoryResult<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, "begin settings transaction"))?;

        for setting in settings {
            let value = serde_json::to_string(&setting.value)
                .map_err(|e| RepositoryError::backend(format!("unserializable setting: {e}")))?;
            sqlx::query(UPSERT)
                .bind(&setting.namespace)
                .bind(&setting.key)
                .bind(value)
                .bind(&setting.value_type)
                .bind(i64::from(setting.editable))
                .bind(i64::from(setting.requires_restart))
                .bind(Self::now_unix())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(e, "put setting"))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(e, "commit settings transaction"))?;
        Ok(())
    }
}
