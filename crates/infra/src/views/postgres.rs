//! Postgres-backed view storage.
//!
//! All views share one table keyed by `(view_name, workspace_id, record_key)`.
//! Keys and values are stored as JSONB; key fields are sorted, so equal keys
//! always produce equal JSONB documents.
//!
//! ## Error Mapping
//!
//! | SQLx Error | ViewStorageError |
//! |------------|------------------|
//! | `PoolClosed`, `PoolTimedOut`, `Io` | `Unavailable` (transient, actualizer retries) |
//! | `ColumnDecode`, `Decode` | `InvalidRecord` |
//! | anything else | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;

use strata_core::{QName, WorkspaceId};
use strata_events::{ViewKey, ViewRecord, ViewValue};

use super::r#trait::{ViewStorage, ViewStorageError};

/// DDL for the table used by [`PostgresViewStorage`].
pub const VIEW_RECORDS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS view_records (
    view_name    TEXT        NOT NULL,
    workspace_id BIGINT      NOT NULL,
    record_key   JSONB       NOT NULL,
    record_value JSONB       NOT NULL,
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (view_name, workspace_id, record_key)
)
"#;

/// Postgres-backed view storage.
///
/// `Send + Sync`; share it behind an `Arc` between the actualizers of an app.
pub struct PostgresViewStorage {
    pool: Arc<PgPool>,
}

impl PostgresViewStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `view_records` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), ViewStorageError> {
        sqlx::query(VIEW_RECORDS_SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl ViewStorage for PostgresViewStorage {
    #[instrument(skip(self, key), fields(view = %view, workspace = %workspace), err)]
    async fn get(
        &self,
        view: &QName,
        workspace: WorkspaceId,
        key: &ViewKey,
    ) -> Result<Option<ViewValue>, ViewStorageError> {
        let row = sqlx::query(
            r#"
            SELECT record_value
            FROM view_records
            WHERE view_name = $1 AND workspace_id = $2 AND record_key = $3
            "#,
        )
        .bind(view.as_str())
        .bind(workspace_param(workspace)?)
        .bind(key_param(key))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|row| row.try_get::<JsonValue, _>("record_value"))
            .transpose()
            .map_err(|e| map_sqlx_error("decode_record_value", e))
    }

    #[instrument(skip(self, records), fields(record_count = records.len()), err)]
    async fn put_batch(&self, records: Vec<ViewRecord>) -> Result<(), ViewStorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO view_records (view_name, workspace_id, record_key, record_value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (view_name, workspace_id, record_key)
                DO UPDATE SET
                    record_value = EXCLUDED.record_value,
                    updated_at = NOW()
                "#,
            )
            .bind(record.view.as_str())
            .bind(workspace_param(record.workspace)?)
            .bind(key_param(&record.key))
            .bind(record.value)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_record", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

fn workspace_param(workspace: WorkspaceId) -> Result<i64, ViewStorageError> {
    i64::try_from(workspace.get()).map_err(|_| {
        ViewStorageError::InvalidRecord(format!("workspace id {workspace} does not fit BIGINT"))
    })
}

fn key_param(key: &ViewKey) -> JsonValue {
    JsonValue::Object(key.fields().clone())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ViewStorageError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            ViewStorageError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            ViewStorageError::InvalidRecord(format!("{operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            ViewStorageError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        other => ViewStorageError::Storage(format!("{operation}: {other}")),
    }
}
