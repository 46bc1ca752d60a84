use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, CustomerId, Money, OrderId, SagaId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, SagaRecord, SagaStatus, SagaStep, SagaStoreError,
    store::SagaStore,
};

const ACTIVE_STATUSES: [&str; 3] = ["Initiated", "InProgress", "Compensating"];
const TERMINAL_STATUSES: [&str; 3] = ["Completed", "Failed", "Compensated"];

const SELECT_COLUMNS: &str = "saga_id, order_id, current_step, saga_status, created_at, \
     updated_at, timeout_at, retry_count, max_retries, correlation_id, customer_id, \
     total_amount_cents, saga_data, compensation_data, last_error_message, version";

/// PostgreSQL-backed saga store implementation.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("saga store migrations applied");
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        let step_name: String = row.try_get("current_step")?;
        let current_step = SagaStep::parse(&step_name).ok_or_else(|| {
            SagaStoreError::Serialization(serde_json::Error::io(std::io::Error::other(format!(
                "unknown saga step: {step_name}"
            ))))
        })?;

        let status_name: String = row.try_get("saga_status")?;
        let status = SagaStatus::parse(&status_name).ok_or_else(|| {
            SagaStoreError::Serialization(serde_json::Error::io(std::io::Error::other(format!(
                "unknown saga status: {status_name}"
            ))))
        })?;

        let saga_data_json: serde_json::Value = row.try_get("saga_data")?;
        let saga_data: HashMap<String, serde_json::Value> =
            serde_json::from_value(saga_data_json)?;

        let compensation_data_json: serde_json::Value = row.try_get("compensation_data")?;
        let compensation_data: HashMap<String, serde_json::Value> =
            serde_json::from_value(compensation_data_json)?;

        Ok(SagaRecord {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            current_step,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            timeout_at: row.try_get("timeout_at")?,
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
            max_retries: row.try_get::<i32, _>("max_retries")? as u32,
            correlation_id: CorrelationId::new(row.try_get::<String, _>("correlation_id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
            saga_data,
            compensation_data,
            last_error_message: row.try_get("last_error_message")?,
            version: row.try_get("version")?,
        })
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn insert(&self, record: SagaRecord) -> Result<SagaRecord> {
        let saga_data = serde_json::to_value(&record.saga_data)?;
        let compensation_data = serde_json::to_value(&record.compensation_data)?;

        let mut tx = self.pool.begin().await?;

        // Serialize concurrent creates for the same order
        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT saga_id FROM saga_instances \
             WHERE order_id = $1 AND saga_status = ANY($2) FOR UPDATE",
        )
        .bind(record.order_id.as_uuid())
        .bind(&ACTIVE_STATUSES[..])
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tracing::debug!(
                order_id = %record.order_id,
                "active saga already exists, insert rejected"
            );
            return Err(SagaStoreError::DuplicateActiveSaga {
                order_id: record.order_id,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO saga_instances (
                saga_id, order_id, current_step, saga_status, created_at, updated_at,
                timeout_at, retry_count, max_retries, correlation_id, customer_id,
                total_amount_cents, saga_data, compensation_data, last_error_message, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.saga_id.as_uuid())
        .bind(record.order_id.as_uuid())
        .bind(record.current_step.as_str())
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.timeout_at)
        .bind(record.retry_count as i32)
        .bind(record.max_retries as i32)
        .bind(record.correlation_id.as_str())
        .bind(record.customer_id.as_uuid())
        .bind(record.total_amount.as_cents())
        .bind(&saga_data)
        .bind(&compensation_data)
        .bind(&record.last_error_message)
        .bind(record.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            // The partial unique index backs up the FOR UPDATE check
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("uniq_saga_instances_active_order")
            {
                return SagaStoreError::DuplicateActiveSaga {
                    order_id: record.order_id,
                };
            }
            SagaStoreError::Database(e)
        })?;

        tx.commit().await?;
        Ok(record)
    }

    async fn update(&self, record: SagaRecord) -> Result<SagaRecord> {
        let saga_data = serde_json::to_value(&record.saga_data)?;
        let compensation_data = serde_json::to_value(&record.compensation_data)?;

        let new_version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE saga_instances SET
                current_step = $1,
                saga_status = $2,
                updated_at = $3,
                timeout_at = $4,
                retry_count = $5,
                max_retries = $6,
                saga_data = $7,
                compensation_data = $8,
                last_error_message = $9,
                version = version + 1
            WHERE saga_id = $10 AND version = $11
            RETURNING version
            "#,
        )
        .bind(record.current_step.as_str())
        .bind(record.status.as_str())
        .bind(record.updated_at)
        .bind(record.timeout_at)
        .bind(record.retry_count as i32)
        .bind(record.max_retries as i32)
        .bind(&saga_data)
        .bind(&compensation_data)
        .bind(&record.last_error_message)
        .bind(record.saga_id.as_uuid())
        .bind(record.version)
        .fetch_optional(&self.pool)
        .await?;

        match new_version {
            Some(version) => {
                let mut updated = record;
                updated.version = version;
                Ok(updated)
            }
            None => {
                // Distinguish a stale version from a missing record
                let actual: Option<i64> =
                    sqlx::query_scalar("SELECT version FROM saga_instances WHERE saga_id = $1")
                        .bind(record.saga_id.as_uuid())
                        .fetch_optional(&self.pool)
                        .await?;

                match actual {
                    Some(actual) => Err(SagaStoreError::ConcurrencyConflict {
                        saga_id: record.saga_id,
                        expected: record.version,
                        actual,
                    }),
                    None => Err(SagaStoreError::NotFound(record.saga_id)),
                }
            }
        }
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances WHERE saga_id = $1"
        ))
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn find_by_order_id(&self, order_id: OrderId) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances \
             WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn find_active_by_order_id(&self, order_id: OrderId) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances \
             WHERE order_id = $1 AND saga_status = ANY($2) LIMIT 1"
        ))
        .bind(order_id.as_uuid())
        .bind(&ACTIVE_STATUSES[..])
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances \
             WHERE saga_status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances WHERE correlation_id = $1 LIMIT 1"
        ))
        .bind(correlation_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn find_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances \
             WHERE timeout_at IS NOT NULL AND timeout_at <= $1 AND saga_status = ANY($2) \
             ORDER BY timeout_at ASC"
        ))
        .bind(now)
        .bind(&ACTIVE_STATUSES[..])
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn find_requiring_attention(
        &self,
        now: DateTime<Utc>,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances WHERE \
                 (timeout_at IS NOT NULL AND timeout_at <= $1 \
                  AND saga_status IN ('InProgress', 'Compensating')) \
              OR (retry_count >= max_retries \
                  AND saga_status IN ('InProgress', 'Compensating')) \
              OR (saga_status = 'Failed' AND updated_at >= $2) \
             ORDER BY updated_at ASC"
        ))
        .bind(now)
        .bind(recent_cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn count_by_status(&self, status: SagaStatus) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM saga_instances WHERE saga_status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM saga_instances WHERE saga_status = ANY($1) AND updated_at <= $2",
        )
        .bind(&TERMINAL_STATUSES[..])
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::debug!(deleted, %cutoff, "terminal sagas deleted");
        }
        Ok(deleted)
    }
}
