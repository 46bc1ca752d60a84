use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId, SagaId};
use tokio::sync::RwLock;

use crate::{
    Result, SagaRecord, SagaStatus, SagaStoreError,
    store::SagaStore,
};

/// In-memory saga store implementation for testing.
///
/// Stores all records in memory behind a single lock and provides the same
/// interface and atomicity guarantees as the PostgreSQL implementation: the
/// duplicate-active check and the version check both run inside one write
/// lock acquisition.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    records: Arc<RwLock<HashMap<SagaId, SagaRecord>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory saga store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of records stored.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Clears all records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn insert(&self, record: SagaRecord) -> Result<SagaRecord> {
        let mut records = self.records.write().await;

        let duplicate = records
            .values()
            .any(|r| r.order_id == record.order_id && r.status.is_active());
        if duplicate {
            return Err(SagaStoreError::DuplicateActiveSaga {
                order_id: record.order_id,
            });
        }

        records.insert(record.saga_id, record.clone());
        Ok(record)
    }

    async fn update(&self, record: SagaRecord) -> Result<SagaRecord> {
        let mut records = self.records.write().await;

        let current = records
            .get(&record.saga_id)
            .ok_or(SagaStoreError::NotFound(record.saga_id))?;

        if current.version != record.version {
            return Err(SagaStoreError::ConcurrencyConflict {
                saga_id: record.saga_id,
                expected: record.version,
                actual: current.version,
            });
        }

        let mut updated = record;
        updated.version += 1;
        records.insert(updated.saga_id, updated.clone());
        Ok(updated)
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&saga_id).cloned())
    }

    async fn find_by_order_id(&self, order_id: OrderId) -> Result<Option<SagaRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.order_id == order_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_active_by_order_id(&self, order_id: OrderId) -> Result<Option<SagaRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.order_id == order_id && r.status.is_active())
            .cloned())
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<SagaRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| &r.correlation_id == correlation_id)
            .cloned())
    }

    async fn find_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<SagaRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| {
                SagaStatus::recovery_statuses().contains(&r.status)
                    && r.timeout_at.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| r.timeout_at);
        Ok(found)
    }

    async fn find_requiring_attention(
        &self,
        now: DateTime<Utc>,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<Vec<SagaRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| {
                let timed_out_active =
                    r.status.can_be_recovered() && r.timeout_at.is_some_and(|d| d <= now);
                let retries_exhausted =
                    r.status.can_be_recovered() && r.retry_count >= r.max_retries;
                let recently_failed =
                    r.status == SagaStatus::Failed && r.updated_at >= recent_cutoff;
                timed_out_active || retries_exhausted || recently_failed
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| r.updated_at);
        Ok(found)
    }

    async fn count_by_status(&self, status: SagaStatus) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records.values().filter(|r| r.status == status).count() as u64)
    }

    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !(r.status.is_terminal() && r.updated_at <= cutoff));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{CustomerId, Money};

    fn make_record() -> SagaRecord {
        SagaRecord::new(
            OrderId::new(),
            CustomerId::new(),
            Money::from_cents(10_000),
            CorrelationId::new("corr-1"),
        )
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = InMemorySagaStore::new();
        let record = make_record();
        let saga_id = record.saga_id;

        store.insert(record.clone()).await.unwrap();

        let found = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(found.saga_id, saga_id);
        assert_eq!(found.order_id, record.order_id);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_active_saga() {
        let store = InMemorySagaStore::new();
        let record = make_record();
        let order_id = record.order_id;

        store.insert(record).await.unwrap();

        let mut duplicate = make_record();
        duplicate.order_id = order_id;

        let result = store.insert(duplicate).await;
        assert!(matches!(
            result,
            Err(SagaStoreError::DuplicateActiveSaga { order_id: o }) if o == order_id
        ));
    }

    #[tokio::test]
    async fn insert_allows_new_saga_after_terminal() {
        let store = InMemorySagaStore::new();
        let mut record = make_record();
        let order_id = record.order_id;
        record.fail("boom");

        store.insert(record).await.unwrap();

        let mut next = make_record();
        next.order_id = order_id;
        assert!(store.insert(next).await.is_ok());
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let store = InMemorySagaStore::new();
        let record = store.insert(make_record()).await.unwrap();
        assert_eq!(record.version, 1);

        let mut changed = record.clone();
        changed.status = SagaStatus::InProgress;
        let updated = store.update(changed).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.status, SagaStatus::InProgress);
    }

    #[tokio::test]
    async fn update_detects_concurrency_conflict() {
        let store = InMemorySagaStore::new();
        let record = store.insert(make_record()).await.unwrap();

        // First writer wins
        let mut first = record.clone();
        first.status = SagaStatus::InProgress;
        store.update(first).await.unwrap();

        // Second writer holds a stale version
        let mut second = record;
        second.status = SagaStatus::Compensating;
        let result = store.update(second).await;
        assert!(matches!(
            result,
            Err(SagaStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn update_unknown_saga_is_not_found() {
        let store = InMemorySagaStore::new();
        let result = store.update(make_record()).await;
        assert!(matches!(result, Err(SagaStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn find_active_by_order_id_ignores_terminal() {
        let store = InMemorySagaStore::new();
        let mut terminal = make_record();
        let order_id = terminal.order_id;
        terminal.fail("boom");
        store.insert(terminal).await.unwrap();

        assert!(
            store
                .find_active_by_order_id(order_id)
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.find_by_order_id(order_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn find_by_correlation_id() {
        let store = InMemorySagaStore::new();
        let record = make_record();
        let correlation = record.correlation_id.clone();
        store.insert(record).await.unwrap();

        let found = store
            .find_by_correlation_id(&correlation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.correlation_id, correlation);

        assert!(
            store
                .find_by_correlation_id(&CorrelationId::new("nope"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn find_timed_out_filters_status_and_deadline() {
        let store = InMemorySagaStore::new();
        let now = Utc::now();

        // Timed out and in progress - should be found
        let mut stalled = make_record();
        stalled.status = SagaStatus::InProgress;
        stalled.timeout_at = Some(now - Duration::minutes(1));
        let stalled_id = stalled.saga_id;
        store.insert(stalled).await.unwrap();

        // Future deadline - should not be found
        let fresh = make_record();
        store.insert(fresh).await.unwrap();

        // Timed out but terminal - should not be found
        let mut done = make_record();
        done.complete();
        done.timeout_at = Some(now - Duration::minutes(1));
        store.insert(done).await.unwrap();

        let found = store.find_timed_out(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].saga_id, stalled_id);
    }

    #[tokio::test]
    async fn find_requiring_attention_covers_all_criteria() {
        let store = InMemorySagaStore::new();
        let now = Utc::now();

        let mut timed_out = make_record();
        timed_out.status = SagaStatus::InProgress;
        timed_out.timeout_at = Some(now - Duration::minutes(1));
        store.insert(timed_out).await.unwrap();

        let mut exhausted = make_record();
        exhausted.status = SagaStatus::Compensating;
        exhausted.retry_count = exhausted.max_retries;
        store.insert(exhausted).await.unwrap();

        let mut recently_failed = make_record();
        recently_failed.fail("boom");
        store.insert(recently_failed).await.unwrap();

        let healthy = make_record();
        store.insert(healthy).await.unwrap();

        let found = store
            .find_requiring_attention(now, now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn count_by_status() {
        let store = InMemorySagaStore::new();
        store.insert(make_record()).await.unwrap();
        store.insert(make_record()).await.unwrap();

        let mut failed = make_record();
        failed.fail("boom");
        store.insert(failed).await.unwrap();

        assert_eq!(
            store.count_by_status(SagaStatus::Initiated).await.unwrap(),
            2
        );
        assert_eq!(store.count_by_status(SagaStatus::Failed).await.unwrap(), 1);
        assert_eq!(
            store.count_by_status(SagaStatus::Completed).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn delete_terminal_older_than_spares_active_and_recent() {
        let store = InMemorySagaStore::new();
        let now = Utc::now();

        let mut old_terminal = make_record();
        old_terminal.complete();
        old_terminal.updated_at = now - Duration::days(40);
        store.insert(old_terminal).await.unwrap();

        let mut recent_terminal = make_record();
        recent_terminal.complete();
        store.insert(recent_terminal).await.unwrap();

        let mut old_active = make_record();
        old_active.status = SagaStatus::InProgress;
        old_active.updated_at = now - Duration::days(40);
        store.insert(old_active).await.unwrap();

        let deleted = store
            .delete_terminal_older_than(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.record_count().await, 2);
    }
}
