//! Saga lifecycle management.
//!
//! All state transitions go through this layer: it loads, mutates, and
//! persists the durable record, so every transition is written before any
//! side effect depends on it.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CorrelationId, CustomerId, Money, OrderId, SagaId};
use saga_store::{SagaRecord, SagaStatus, SagaStore, SagaStoreError};
use serde_json::Value;

use crate::config::SagaConfig;
use crate::error::Result;

/// Failure reason recorded when a saga runs out of retry budget.
pub const RETRY_EXHAUSTED_MESSAGE: &str = "Maximum retry attempts exceeded";

/// Failure reason recorded when the recovery sweep finds a saga that can no
/// longer be retried.
pub const RECOVERY_EXHAUSTED_MESSAGE: &str = "Maximum retry attempts exceeded during recovery";

/// How far back health monitoring looks for recent failures.
const ATTENTION_WINDOW_HOURS: i64 = 1;

/// Manages saga state transitions against a [`SagaStore`].
#[derive(Clone)]
pub struct SagaLifecycle<S> {
    store: Arc<S>,
    timeout_secs: i64,
    max_retries: u32,
}

impl<S: SagaStore> SagaLifecycle<S> {
    /// Creates a lifecycle manager with default settings.
    pub fn new(store: Arc<S>) -> Self {
        let config = SagaConfig::default();
        Self::with_config(store, &config)
    }

    /// Creates a lifecycle manager with the given settings.
    pub fn with_config(store: Arc<S>, config: &SagaConfig) -> Self {
        Self {
            store,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Creates and persists a new saga for an order.
    ///
    /// Fails with `DuplicateActiveSaga` if the order already has an active
    /// saga. `initial_data` is stashed in the record's working data so later
    /// steps and recovery can re-derive their commands from it.
    pub async fn create_saga(
        &self,
        order_id: OrderId,
        customer_id: CustomerId,
        total_amount: Money,
        initial_data: Vec<(String, Value)>,
    ) -> Result<SagaRecord> {
        let correlation_id = CorrelationId::generate(order_id);
        let mut record = SagaRecord::builder(order_id, customer_id, total_amount, correlation_id)
            .max_retries(self.max_retries)
            .timeout_at(Utc::now() + Duration::seconds(self.timeout_secs))
            .build();

        for (key, value) in initial_data {
            record.put_saga_data(key, value);
        }

        let record = self.store.insert(record).await?;
        tracing::info!(
            saga_id = %record.saga_id,
            order_id = %order_id,
            correlation_id = %record.correlation_id,
            "saga created"
        );
        Ok(record)
    }

    /// Marks the saga as actively executing its current step.
    pub async fn start(&self, mut record: SagaRecord) -> Result<SagaRecord> {
        record.status = SagaStatus::InProgress;
        record.updated_at = Utc::now();
        Ok(self.store.update(record).await?)
    }

    /// Advances the saga to its next step and persists the transition.
    pub async fn advance(&self, mut record: SagaRecord) -> Result<SagaRecord> {
        record.advance_to_next_step()?;
        let record = self.store.update(record).await?;
        tracing::info!(
            saga_id = %record.saga_id,
            step = %record.current_step,
            status = %record.status,
            "saga advanced"
        );
        Ok(record)
    }

    /// Diverts the saga into compensation, recording the reason and giving
    /// the compensation a fresh deadline.
    pub async fn start_compensation(
        &self,
        mut record: SagaRecord,
        reason: impl Into<String>,
    ) -> Result<SagaRecord> {
        let reason = reason.into();
        record.start_compensation(reason.clone());
        record.reset_timeout();
        let record = self.store.update(record).await?;
        tracing::warn!(
            saga_id = %record.saga_id,
            order_id = %record.order_id,
            reason = %reason,
            "saga compensation started"
        );
        Ok(record)
    }

    /// Completes the saga successfully (terminal).
    pub async fn complete(&self, mut record: SagaRecord) -> Result<SagaRecord> {
        record.complete();
        let record = self.store.update(record).await?;
        tracing::info!(
            saga_id = %record.saga_id,
            order_id = %record.order_id,
            "saga completed"
        );
        Ok(record)
    }

    /// Fails the saga permanently (terminal).
    pub async fn fail(
        &self,
        mut record: SagaRecord,
        reason: impl Into<String>,
    ) -> Result<SagaRecord> {
        let reason = reason.into();
        record.fail(reason.clone());
        let record = self.store.update(record).await?;
        tracing::warn!(
            saga_id = %record.saga_id,
            order_id = %record.order_id,
            reason = %reason,
            "saga failed"
        );
        Ok(record)
    }

    /// Consumes one retry from the saga's budget.
    ///
    /// While budget remains, increments the retry count and pushes the
    /// deadline out. The call that spends the last slot fails the saga with
    /// [`RETRY_EXHAUSTED_MESSAGE`] instead, so `retry_count` never exceeds
    /// `max_retries`. Callers inspect the returned record's status to learn
    /// which happened.
    pub async fn retry(&self, mut record: SagaRecord) -> Result<SagaRecord> {
        if !record.can_retry() {
            return self.fail(record, RETRY_EXHAUSTED_MESSAGE).await;
        }

        if !record.increment_retry_count() {
            return self.fail(record, RETRY_EXHAUSTED_MESSAGE).await;
        }
        record.reset_timeout();
        let record = self.store.update(record).await?;
        tracing::info!(
            saga_id = %record.saga_id,
            retry_count = record.retry_count,
            max_retries = record.max_retries,
            "saga retry scheduled"
        );
        Ok(record)
    }

    /// Persists updated saga working data without a state transition.
    pub async fn save(&self, record: SagaRecord) -> Result<SagaRecord> {
        Ok(self.store.update(record).await?)
    }

    /// Loads a saga, failing if it does not exist.
    pub async fn get_saga(&self, saga_id: SagaId) -> Result<SagaRecord> {
        self.store
            .get(saga_id)
            .await?
            .ok_or_else(|| SagaStoreError::NotFound(saga_id).into())
    }

    /// Loads the most recent saga for an order, if any.
    pub async fn get_saga_by_order_id(&self, order_id: OrderId) -> Result<Option<SagaRecord>> {
        Ok(self.store.find_by_order_id(order_id).await?)
    }

    /// Loads the active saga for an order, if any.
    pub async fn get_active_saga_by_order_id(
        &self,
        order_id: OrderId,
    ) -> Result<Option<SagaRecord>> {
        Ok(self.store.find_active_by_order_id(order_id).await?)
    }

    /// Loads a saga by its correlation ID, if any.
    pub async fn get_saga_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<SagaRecord>> {
        Ok(self.store.find_by_correlation_id(correlation_id).await?)
    }

    /// Lists all sagas with the given status.
    pub async fn find_sagas_by_status(&self, status: SagaStatus) -> Result<Vec<SagaRecord>> {
        Ok(self.store.find_by_status(status).await?)
    }

    /// Lists sagas whose deadline has passed.
    pub async fn find_timed_out_sagas(&self) -> Result<Vec<SagaRecord>> {
        Ok(self.store.find_timed_out(Utc::now()).await?)
    }

    /// Lists sagas needing operator attention: stalled, out of retries, or
    /// failed within the last hour.
    pub async fn find_sagas_requiring_attention(&self) -> Result<Vec<SagaRecord>> {
        let now = Utc::now();
        let recent_cutoff = now - Duration::hours(ATTENTION_WINDOW_HOURS);
        Ok(self.store.find_requiring_attention(now, recent_cutoff).await?)
    }

    /// Deletes terminal sagas older than the retention window.
    pub async fn cleanup_old_sagas(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let deleted = self.store.delete_terminal_older_than(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, retention_days, "old sagas cleaned up");
        }
        Ok(deleted)
    }

    /// Counts sagas per status.
    pub async fn statistics(&self) -> Result<SagaStatistics> {
        Ok(SagaStatistics {
            initiated: self.store.count_by_status(SagaStatus::Initiated).await?,
            in_progress: self.store.count_by_status(SagaStatus::InProgress).await?,
            completed: self.store.count_by_status(SagaStatus::Completed).await?,
            failed: self.store.count_by_status(SagaStatus::Failed).await?,
            compensating: self.store.count_by_status(SagaStatus::Compensating).await?,
            compensated: self.store.count_by_status(SagaStatus::Compensated).await?,
        })
    }
}

/// Point-in-time count of sagas per status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SagaStatistics {
    pub initiated: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub compensating: u64,
    pub compensated: u64,
}

impl SagaStatistics {
    /// Number of sagas still in flight.
    pub fn active(&self) -> u64 {
        self.initiated + self.in_progress + self.compensating
    }

    /// Total sagas counted.
    pub fn total(&self) -> u64 {
        self.active() + self.completed + self.failed + self.compensated
    }
}
