//! The durable saga record.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use common::{CorrelationId, CustomerId, Money, OrderId, SagaId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::status::SagaStatus;
use crate::step::SagaStep;

/// Default deadline for a saga step before recovery considers it stalled.
pub const DEFAULT_TIMEOUT_SECS: i64 = 5 * 60;

/// Default retry budget for a saga.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The durable representation of one in-flight distributed transaction.
///
/// A record is created when the triggering order event arrives and is mutated
/// exclusively through the lifecycle manager's transition operations. The
/// record is the single source of truth: outbound messages are best-effort
/// and may be lost, in which case the recovery engine re-drives the saga
/// from this state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Globally unique saga identifier, immutable after creation.
    pub saga_id: SagaId,
    /// The order this saga coordinates. Unique among active sagas.
    pub order_id: OrderId,
    /// The step the saga is currently executing.
    pub current_step: SagaStep,
    /// Overall lifecycle status, used for query and recovery filtering.
    pub status: SagaStatus,
    pub created_at: DateTime<Utc>,
    /// Refreshed on every mutation.
    pub updated_at: DateTime<Utc>,
    /// Deadline after which recovery considers the saga stalled.
    /// Cleared on terminal completion, reset on each retry.
    pub timeout_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Tracing identifier propagated to all emitted commands and events.
    pub correlation_id: CorrelationId,
    pub customer_id: CustomerId,
    pub total_amount: Money,
    /// Open step-scoped working data (e.g. stashed order items).
    pub saga_data: HashMap<String, Value>,
    /// Records what must be undone if the saga fails.
    pub compensation_data: HashMap<String, Value>,
    /// Most recent failure reason, for diagnostics.
    pub last_error_message: Option<String>,
    /// Optimistic concurrency token, bumped by the store on every update.
    pub version: i64,
}

impl SagaRecord {
    /// Creates a new saga record in its initial state.
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        total_amount: Money,
        correlation_id: CorrelationId,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id: SagaId::new(),
            order_id,
            current_step: SagaStep::InventoryReservation,
            status: SagaStatus::Initiated,
            created_at: now,
            updated_at: now,
            timeout_at: Some(now + Duration::seconds(DEFAULT_TIMEOUT_SECS)),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            correlation_id,
            customer_id,
            total_amount,
            saga_data: HashMap::new(),
            compensation_data: HashMap::new(),
            last_error_message: None,
            version: 1,
        }
    }

    /// Returns a builder for records that need non-default retry budgets
    /// or deadlines.
    pub fn builder(
        order_id: OrderId,
        customer_id: CustomerId,
        total_amount: Money,
        correlation_id: CorrelationId,
    ) -> SagaRecordBuilder {
        SagaRecordBuilder {
            record: Self::new(order_id, customer_id, total_amount, correlation_id),
        }
    }

    /// Advances the saga to the next step in the flow.
    ///
    /// Sets `status` to `InProgress`, or to the matching terminal status when
    /// the new step is terminal (clearing the timeout). Fails with
    /// `IllegalStateTransition` from a terminal step.
    pub fn advance_to_next_step(&mut self) -> Result<()> {
        let next = self.current_step.next()?;
        self.current_step = next;
        self.status = match next {
            SagaStep::Failed => SagaStatus::Failed,
            step if step.is_terminal() => SagaStatus::Completed,
            _ => SagaStatus::InProgress,
        };
        if next.is_terminal() {
            self.timeout_at = None;
        }
        self.touch();
        Ok(())
    }

    /// Diverts the saga into the compensation flow, recording the reason.
    pub fn start_compensation(&mut self, reason: impl Into<String>) {
        self.current_step = SagaStep::Compensating;
        self.status = SagaStatus::Compensating;
        self.last_error_message = Some(reason.into());
        self.touch();
    }

    /// Completes the saga successfully. Clears the timeout.
    pub fn complete(&mut self) {
        self.current_step = SagaStep::Completed;
        self.status = SagaStatus::Completed;
        self.timeout_at = None;
        self.touch();
    }

    /// Fails the saga permanently. Terminal and irreversible.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.current_step = SagaStep::Failed;
        self.status = SagaStatus::Failed;
        self.last_error_message = Some(reason.into());
        self.timeout_at = None;
        self.touch();
    }

    /// Increments the retry count.
    ///
    /// Returns true while the budget still allows further retries.
    pub fn increment_retry_count(&mut self) -> bool {
        self.retry_count += 1;
        self.touch();
        self.retry_count < self.max_retries
    }

    /// Pushes the timeout deadline out by the default timeout window.
    pub fn reset_timeout(&mut self) {
        self.timeout_at = Some(Utc::now() + Duration::seconds(DEFAULT_TIMEOUT_SECS));
        self.touch();
    }

    /// Returns true if the saga's deadline has passed.
    pub fn has_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.timeout_at.is_some_and(|deadline| now > deadline)
    }

    /// Returns true if the saga has retry budget left and is in a
    /// recoverable status.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries && self.status.can_be_recovered()
    }

    /// Returns true if the saga has not reached a terminal status.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Merges a key/value pair into the step-scoped working data.
    pub fn put_saga_data(&mut self, key: impl Into<String>, value: Value) {
        self.saga_data.insert(key.into(), value);
        self.touch();
    }

    /// Returns a saga data value by key.
    pub fn get_saga_data(&self, key: &str) -> Option<&Value> {
        self.saga_data.get(key)
    }

    /// Merges a key/value pair into the compensation bookkeeping data.
    pub fn put_compensation_data(&mut self, key: impl Into<String>, value: Value) {
        self.compensation_data.insert(key.into(), value);
        self.touch();
    }

    /// Returns a compensation data value by key.
    pub fn get_compensation_data(&self, key: &str) -> Option<&Value> {
        self.compensation_data.get(key)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl std::fmt::Display for SagaRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SagaRecord{{saga_id={}, order_id={}, step={}, status={}, retries={}/{}}}",
            self.saga_id,
            self.order_id,
            self.current_step,
            self.status,
            self.retry_count,
            self.max_retries
        )
    }
}

/// Builder for saga records with non-default settings.
pub struct SagaRecordBuilder {
    record: SagaRecord,
}

impl SagaRecordBuilder {
    /// Overrides the retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.record.max_retries = max_retries;
        self
    }

    /// Overrides the initial timeout deadline.
    pub fn timeout_at(mut self, timeout_at: DateTime<Utc>) -> Self {
        self.record.timeout_at = Some(timeout_at);
        self
    }

    /// Finishes building the record.
    pub fn build(self) -> SagaRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SagaStoreError;

    fn make_record() -> SagaRecord {
        SagaRecord::new(
            OrderId::new(),
            CustomerId::new(),
            Money::from_cents(10_000),
            CorrelationId::new("corr-1"),
        )
    }

    #[test]
    fn test_new_record_initial_state() {
        let record = make_record();
        assert_eq!(record.current_step, SagaStep::InventoryReservation);
        assert_eq!(record.status, SagaStatus::Initiated);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.max_retries, DEFAULT_MAX_RETRIES);
        assert!(record.timeout_at.is_some());
        assert!(record.last_error_message.is_none());
        assert_eq!(record.version, 1);
    }

    #[test]
    fn test_advance_through_forward_path() {
        let mut record = make_record();

        record.advance_to_next_step().unwrap();
        assert_eq!(record.current_step, SagaStep::PaymentProcessing);
        assert_eq!(record.status, SagaStatus::InProgress);

        record.advance_to_next_step().unwrap();
        assert_eq!(record.current_step, SagaStep::OrderConfirmation);
        assert_eq!(record.status, SagaStatus::InProgress);

        record.advance_to_next_step().unwrap();
        assert_eq!(record.current_step, SagaStep::Completed);
        assert_eq!(record.status, SagaStatus::Completed);
        assert!(record.timeout_at.is_none());
    }

    #[test]
    fn test_advance_from_terminal_step_is_illegal() {
        let mut record = make_record();
        record.complete();

        assert!(matches!(
            record.advance_to_next_step(),
            Err(SagaStoreError::IllegalStateTransition {
                from: SagaStep::Completed
            })
        ));
    }

    #[test]
    fn test_advance_from_compensating_fails_the_saga() {
        let mut record = make_record();
        record.start_compensation("payment declined");

        record.advance_to_next_step().unwrap();
        assert_eq!(record.current_step, SagaStep::Failed);
        assert_eq!(record.status, SagaStatus::Failed);
        assert!(record.timeout_at.is_none());
    }

    #[test]
    fn test_start_compensation_records_reason() {
        let mut record = make_record();
        record.start_compensation("payment declined");

        assert_eq!(record.current_step, SagaStep::Compensating);
        assert_eq!(record.status, SagaStatus::Compensating);
        assert_eq!(
            record.last_error_message.as_deref(),
            Some("payment declined")
        );
    }

    #[test]
    fn test_fail_clears_timeout() {
        let mut record = make_record();
        record.fail("out of stock");

        assert_eq!(record.current_step, SagaStep::Failed);
        assert_eq!(record.status, SagaStatus::Failed);
        assert!(record.timeout_at.is_none());
        assert_eq!(record.last_error_message.as_deref(), Some("out of stock"));
    }

    #[test]
    fn test_retry_budget() {
        let mut record = make_record();
        record.status = SagaStatus::InProgress;

        assert!(record.can_retry());
        assert!(record.increment_retry_count()); // 1 of 3
        assert!(record.increment_retry_count()); // 2 of 3
        assert!(!record.increment_retry_count()); // 3 of 3 - budget exhausted
        assert_eq!(record.retry_count, 3);
        assert!(!record.can_retry());
    }

    #[test]
    fn test_can_retry_requires_recoverable_status() {
        let mut record = make_record();
        assert_eq!(record.status, SagaStatus::Initiated);
        assert!(!record.can_retry());

        record.status = SagaStatus::InProgress;
        assert!(record.can_retry());

        record.complete();
        assert!(!record.can_retry());
    }

    #[test]
    fn test_timeout_detection() {
        let mut record = make_record();
        let now = Utc::now();

        assert!(!record.has_timed_out(now));
        assert!(record.has_timed_out(now + Duration::minutes(10)));

        record.complete();
        assert!(!record.has_timed_out(now + Duration::minutes(10)));
    }

    #[test]
    fn test_reset_timeout_moves_deadline_forward() {
        let mut record = make_record();
        record.timeout_at = Some(Utc::now() - Duration::minutes(1));
        assert!(record.has_timed_out(Utc::now()));

        record.reset_timeout();
        assert!(!record.has_timed_out(Utc::now()));
    }

    #[test]
    fn test_saga_data_roundtrip() {
        let mut record = make_record();
        record.put_saga_data("reservation_id", serde_json::json!("RES-1"));
        record.put_compensation_data("inventory_reserved", serde_json::json!(true));

        assert_eq!(
            record.get_saga_data("reservation_id"),
            Some(&serde_json::json!("RES-1"))
        );
        assert_eq!(
            record.get_compensation_data("inventory_reserved"),
            Some(&serde_json::json!(true))
        );
        assert!(record.get_saga_data("missing").is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let deadline = Utc::now() + Duration::minutes(1);
        let record = SagaRecord::builder(
            OrderId::new(),
            CustomerId::new(),
            Money::from_cents(500),
            CorrelationId::new("corr-2"),
        )
        .max_retries(5)
        .timeout_at(deadline)
        .build();

        assert_eq!(record.max_retries, 5);
        assert_eq!(record.timeout_at, Some(deadline));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut record = make_record();
        record.put_saga_data("key", serde_json::json!({"nested": 1}));

        let json = serde_json::to_string(&record).unwrap();
        let deserialized: SagaRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, deserialized);
    }
}
