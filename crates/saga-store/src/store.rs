use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId, SagaId};

use crate::{Result, SagaRecord, SagaStatus};

/// Core trait for saga store implementations.
///
/// The store is the single source of truth for saga state. All
/// implementations must be thread-safe (Send + Sync), and every write must
/// be atomic: the duplicate-active check in `insert` and the version check
/// in `update` happen inside a single storage transaction so concurrent
/// callers race safely.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a new saga record.
    ///
    /// Fails with `DuplicateActiveSaga` if an active (non-terminal) record
    /// already exists for the same order. The check and the insert are
    /// atomic.
    async fn insert(&self, record: SagaRecord) -> Result<SagaRecord>;

    /// Updates an existing record using optimistic concurrency.
    ///
    /// The update only applies if the stored version matches
    /// `record.version`; otherwise it fails with `ConcurrencyConflict`.
    /// On success the returned record carries the bumped version.
    async fn update(&self, record: SagaRecord) -> Result<SagaRecord>;

    /// Retrieves a saga by its ID.
    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaRecord>>;

    /// Retrieves the most recent saga for an order, active or not.
    async fn find_by_order_id(&self, order_id: OrderId) -> Result<Option<SagaRecord>>;

    /// Retrieves the active (non-terminal) saga for an order, if any.
    async fn find_active_by_order_id(&self, order_id: OrderId) -> Result<Option<SagaRecord>>;

    /// Retrieves all sagas with the given status.
    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaRecord>>;

    /// Retrieves a saga by its correlation ID.
    async fn find_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<SagaRecord>>;

    /// Retrieves sagas whose deadline has passed and whose status is still
    /// recoverable (`Initiated`, `InProgress`, `Compensating`).
    ///
    /// This is the critical query for the recovery sweep.
    async fn find_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<SagaRecord>>;

    /// Retrieves sagas requiring operator attention: timed out while active,
    /// retry budget exhausted while active, or failed since `recent_cutoff`.
    async fn find_requiring_attention(
        &self,
        now: DateTime<Utc>,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<Vec<SagaRecord>>;

    /// Counts sagas with the given status.
    async fn count_by_status(&self, status: SagaStatus) -> Result<u64>;

    /// Permanently deletes terminal sagas last updated before `cutoff`.
    ///
    /// Returns the number of records deleted. Active sagas are never
    /// touched.
    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
