//! The saga orchestrator: event handlers driving order transactions.
//!
//! Handlers are idempotent under at-least-once delivery. Every handler
//! persists the state transition before publishing, and treats an optimistic
//! concurrency conflict as proof that a duplicate delivery already applied
//! the same transition, in which case the event is dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use saga_store::{SagaRecord, SagaStatus, SagaStep, SagaStore, SagaStoreError};
use serde_json::Value;

use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::lifecycle::SagaLifecycle;
use crate::messages::{
    InventoryConfirmationCommand, InventoryReleaseCommand, InventoryReservationCommand,
    InventoryReservationFailedEvent, InventoryReservedEvent, OrderCreatedEvent, OrderItem,
    OrderStatus, OrderStatusUpdatedEvent, PaymentProcessedEvent, PaymentProcessingCommand,
};
use crate::metrics::SagaMetrics;
use crate::publisher::{MessagePublisher, OutboundMessage};
use crate::schedule;

const ORDER_ITEMS_KEY: &str = "order_items";
const PAYMENT_ID_KEY: &str = "payment_id";
const RESERVATION_ID_KEY: &str = "reservation_id";
const INVENTORY_RESERVED_KEY: &str = "inventory_reserved";

const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_BASE_DELAY: Duration = Duration::from_millis(25);

/// Orchestrates order transactions across inventory, payment, and order
/// services.
///
/// The durable saga record is the source of truth; outbound messages are
/// best-effort and a lost message is re-driven later from the record by the
/// recovery engine.
pub struct SagaOrchestrator<S, P> {
    lifecycle: SagaLifecycle<S>,
    publisher: Arc<P>,
    metrics: Arc<SagaMetrics>,
}

impl<S, P> SagaOrchestrator<S, P>
where
    S: SagaStore,
    P: MessagePublisher,
{
    /// Creates an orchestrator with default settings.
    pub fn new(store: Arc<S>, publisher: Arc<P>) -> Self {
        Self::with_config(store, publisher, &SagaConfig::default())
    }

    /// Creates an orchestrator with the given settings.
    pub fn with_config(store: Arc<S>, publisher: Arc<P>, config: &SagaConfig) -> Self {
        Self {
            lifecycle: SagaLifecycle::with_config(store, config),
            publisher,
            metrics: Arc::new(SagaMetrics::new()),
        }
    }

    /// Returns the lifecycle manager, for queries and recovery.
    pub fn lifecycle(&self) -> &SagaLifecycle<S> {
        &self.lifecycle
    }

    /// Returns the in-process metrics.
    pub fn metrics(&self) -> &Arc<SagaMetrics> {
        &self.metrics
    }

    /// Starts a new saga for a freshly placed order.
    ///
    /// Duplicate deliveries are detected by the store's one-active-saga-per-
    /// order rule and dropped.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_order_created(&self, event: OrderCreatedEvent) -> Result<()> {
        let items_value = serde_json::to_value(&event.items)?;
        let record = match self
            .lifecycle
            .create_saga(
                event.order_id,
                event.customer_id,
                event.total_amount,
                vec![(ORDER_ITEMS_KEY.to_string(), items_value)],
            )
            .await
        {
            Ok(record) => record,
            Err(SagaError::Store(SagaStoreError::DuplicateActiveSaga { order_id })) => {
                tracing::debug!(order_id = %order_id, "duplicate OrderCreated dropped");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.metrics.record_created();

        let record = match self.lifecycle.start(record).await {
            Ok(record) => record,
            Err(e) if e.is_concurrency_conflict() => return Ok(()),
            Err(e) => return Err(e),
        };

        self.publish_best_effort(OutboundMessage::InventoryReservation(
            InventoryReservationCommand {
                order_id: record.order_id,
                items: event.items,
                correlation_id: record.correlation_id.clone(),
            },
        ))
        .await;
        Ok(())
    }

    /// Advances past the inventory step and requests payment.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_inventory_reserved(&self, event: InventoryReservedEvent) -> Result<()> {
        let Some(mut record) = self
            .lifecycle
            .get_active_saga_by_order_id(event.order_id)
            .await?
        else {
            tracing::warn!(order_id = %event.order_id, "InventoryReserved for unknown saga");
            return Ok(());
        };

        if record.current_step != SagaStep::InventoryReservation {
            tracing::debug!(
                saga_id = %record.saga_id,
                step = %record.current_step,
                "InventoryReserved out of order, dropped"
            );
            return Ok(());
        }

        record.put_compensation_data(INVENTORY_RESERVED_KEY, Value::Bool(true));
        record.put_compensation_data(RESERVATION_ID_KEY, Value::String(event.reservation_id));

        let record = match self.lifecycle.advance(record).await {
            Ok(record) => record,
            Err(e) if e.is_concurrency_conflict() => return Ok(()),
            Err(e) => return Err(e),
        };

        self.publish_best_effort(OutboundMessage::PaymentProcessing(PaymentProcessingCommand {
            order_id: record.order_id,
            customer_id: record.customer_id,
            amount: record.total_amount,
            correlation_id: record.correlation_id.clone(),
        }))
        .await;
        Ok(())
    }

    /// Fails the saga when inventory cannot be reserved.
    ///
    /// Nothing was reserved, so there is nothing to compensate: the saga goes
    /// straight to `Failed`.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_inventory_reservation_failed(
        &self,
        event: InventoryReservationFailedEvent,
    ) -> Result<()> {
        let Some(record) = self
            .lifecycle
            .get_active_saga_by_order_id(event.order_id)
            .await?
        else {
            tracing::warn!(order_id = %event.order_id, "reservation failure for unknown saga");
            return Ok(());
        };

        if record.current_step != SagaStep::InventoryReservation {
            tracing::debug!(
                saga_id = %record.saga_id,
                step = %record.current_step,
                "reservation failure out of order, dropped"
            );
            return Ok(());
        }

        let record = match self.lifecycle.fail(record, event.reason).await {
            Ok(record) => record,
            Err(e) if e.is_concurrency_conflict() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.metrics.record_failed();

        self.publish_best_effort(OutboundMessage::OrderStatusUpdated(OrderStatusUpdatedEvent {
            order_id: record.order_id,
            old_status: OrderStatus::Pending,
            new_status: OrderStatus::Failed,
            timestamp: Utc::now(),
            correlation_id: record.correlation_id.clone(),
        }))
        .await;
        Ok(())
    }

    /// Completes the saga on payment success, or compensates on decline.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_payment_processed(&self, event: PaymentProcessedEvent) -> Result<()> {
        let Some(mut record) = self
            .lifecycle
            .get_active_saga_by_order_id(event.order_id)
            .await?
        else {
            tracing::warn!(order_id = %event.order_id, "PaymentProcessed for unknown saga");
            return Ok(());
        };

        if record.current_step != SagaStep::PaymentProcessing {
            tracing::debug!(
                saga_id = %record.saga_id,
                step = %record.current_step,
                "PaymentProcessed out of order, dropped"
            );
            return Ok(());
        }

        if event.status.is_successful() {
            record.put_saga_data(PAYMENT_ID_KEY, Value::String(event.payment_id));
            let record = match self.lifecycle.advance(record).await {
                Ok(record) => record,
                Err(e) if e.is_concurrency_conflict() => return Ok(()),
                Err(e) => return Err(e),
            };

            self.publish_best_effort(OutboundMessage::InventoryConfirmation(
                InventoryConfirmationCommand {
                    order_id: record.order_id,
                    reservation_id: reservation_id_of(&record),
                    correlation_id: record.correlation_id.clone(),
                },
            ))
            .await;

            self.finish(record).await
        } else {
            let reason = event
                .failure_reason
                .unwrap_or_else(|| format!("Payment {:?}", event.status));
            let record = match self.lifecycle.start_compensation(record, reason).await {
                Ok(record) => record,
                Err(e) if e.is_concurrency_conflict() => return Ok(()),
                Err(e) => return Err(e),
            };
            self.compensate(record).await
        }
    }

    /// Re-drives an active saga from its durable state.
    ///
    /// Consumes one retry from the budget and re-emits the command for the
    /// current step. Returns false when there is nothing to retry or the
    /// budget is exhausted (in which case the saga is failed).
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn retry_saga(&self, order_id: common::OrderId) -> Result<bool> {
        let Some(record) = self.lifecycle.get_active_saga_by_order_id(order_id).await? else {
            return Ok(false);
        };

        let record = match self.lifecycle.retry(record).await {
            Ok(record) => record,
            Err(e) if e.is_concurrency_conflict() => return Ok(false),
            Err(e) => return Err(e),
        };

        if record.status == SagaStatus::Failed {
            self.metrics.record_failed();
            self.publish_best_effort(OutboundMessage::OrderStatusUpdated(
                OrderStatusUpdatedEvent {
                    order_id: record.order_id,
                    old_status: OrderStatus::Pending,
                    new_status: OrderStatus::Failed,
                    timestamp: Utc::now(),
                    correlation_id: record.correlation_id.clone(),
                },
            ))
            .await;
            return Ok(false);
        }
        self.metrics.record_retried();

        match record.current_step {
            SagaStep::InventoryReservation => {
                let items = self.order_items_of(&record)?;
                self.publish_best_effort(OutboundMessage::InventoryReservation(
                    InventoryReservationCommand {
                        order_id: record.order_id,
                        items,
                        correlation_id: record.correlation_id.clone(),
                    },
                ))
                .await;
            }
            SagaStep::PaymentProcessing => {
                self.publish_best_effort(OutboundMessage::PaymentProcessing(
                    PaymentProcessingCommand {
                        order_id: record.order_id,
                        customer_id: record.customer_id,
                        amount: record.total_amount,
                        correlation_id: record.correlation_id.clone(),
                    },
                ))
                .await;
            }
            SagaStep::OrderConfirmation => {
                // Crashed between confirming inventory and completing
                self.publish_best_effort(OutboundMessage::InventoryConfirmation(
                    InventoryConfirmationCommand {
                        order_id: record.order_id,
                        reservation_id: reservation_id_of(&record),
                        correlation_id: record.correlation_id.clone(),
                    },
                ))
                .await;
                self.finish(record).await?;
            }
            SagaStep::Compensating => {
                self.compensate(record).await?;
            }
            SagaStep::Completed | SagaStep::Failed => {}
        }
        Ok(true)
    }

    /// Completes the saga and announces the confirmed order.
    async fn finish(&self, record: SagaRecord) -> Result<()> {
        let record = match self.lifecycle.complete(record).await {
            Ok(record) => record,
            Err(e) if e.is_concurrency_conflict() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.metrics
            .record_completed(record.updated_at - record.created_at);

        self.publish_best_effort(OutboundMessage::OrderStatusUpdated(OrderStatusUpdatedEvent {
            order_id: record.order_id,
            old_status: OrderStatus::Pending,
            new_status: OrderStatus::Completed,
            timestamp: Utc::now(),
            correlation_id: record.correlation_id.clone(),
        }))
        .await;
        Ok(())
    }

    /// Runs compensation for a saga already in `Compensating`.
    ///
    /// The release command is always emitted, whether or not a reservation is
    /// recorded; releasing nothing is a no-op downstream. If the release
    /// cannot be published the saga stays `Compensating` and the recovery
    /// engine re-drives it after the deadline. Once the release is out the
    /// saga ends `Failed`, keeping the reason recorded when compensation
    /// started — compensation undoes the reservation, it never completes the
    /// order.
    async fn compensate(&self, record: SagaRecord) -> Result<()> {
        let released = self
            .publish_best_effort(OutboundMessage::InventoryRelease(InventoryReleaseCommand {
                order_id: record.order_id,
                reservation_id: reservation_id_of(&record),
                correlation_id: record.correlation_id.clone(),
            }))
            .await;

        if !released {
            return Ok(());
        }

        let reason = record
            .last_error_message
            .clone()
            .unwrap_or_else(|| "Compensation completed".to_string());
        let record = match self.lifecycle.fail(record, reason).await {
            Ok(record) => record,
            Err(e) if e.is_concurrency_conflict() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.metrics.record_compensated();

        self.publish_best_effort(OutboundMessage::OrderStatusUpdated(OrderStatusUpdatedEvent {
            order_id: record.order_id,
            old_status: OrderStatus::Pending,
            new_status: OrderStatus::Failed,
            timestamp: Utc::now(),
            correlation_id: record.correlation_id.clone(),
        }))
        .await;
        Ok(())
    }

    /// Publishes with a short backoff, recording failures without propagating
    /// them. Returns whether the message got out.
    async fn publish_best_effort(&self, message: OutboundMessage) -> bool {
        let kind = message.kind();
        let result = schedule::retry_with_backoff(PUBLISH_ATTEMPTS, PUBLISH_BASE_DELAY, || {
            self.publisher.publish(message.clone())
        })
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_publish_failure(kind);
                tracing::error!(
                    order_id = %message.order_id(),
                    message_kind = kind,
                    error = %e,
                    "publish failed, saga state remains authoritative"
                );
                false
            }
        }
    }

    fn order_items_of(&self, record: &SagaRecord) -> Result<Vec<OrderItem>> {
        let value = record
            .get_saga_data(ORDER_ITEMS_KEY)
            .ok_or_else(|| SagaError::MissingSagaData {
                saga_id: record.saga_id,
                key: ORDER_ITEMS_KEY.to_string(),
            })?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

fn reservation_id_of(record: &SagaRecord) -> Option<String> {
    record
        .get_compensation_data(RESERVATION_ID_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
}
