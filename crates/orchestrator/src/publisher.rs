//! Outbound message publishing.
//!
//! The orchestrator persists saga state before publishing, so delivery is
//! best-effort: a lost message is recovered later by the recovery engine
//! re-driving the saga from its durable record.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::messages::{
    InventoryConfirmationCommand, InventoryReleaseCommand, InventoryReservationCommand,
    OrderStatusUpdatedEvent, PaymentProcessingCommand,
};

/// A message emitted by the orchestrator to a downstream service.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    InventoryReservation(InventoryReservationCommand),
    InventoryConfirmation(InventoryConfirmationCommand),
    InventoryRelease(InventoryReleaseCommand),
    PaymentProcessing(PaymentProcessingCommand),
    OrderStatusUpdated(OrderStatusUpdatedEvent),
}

impl OutboundMessage {
    /// Returns a stable name for the message kind, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::InventoryReservation(_) => "InventoryReservationCommand",
            OutboundMessage::InventoryConfirmation(_) => "InventoryConfirmationCommand",
            OutboundMessage::InventoryRelease(_) => "InventoryReleaseCommand",
            OutboundMessage::PaymentProcessing(_) => "PaymentProcessingCommand",
            OutboundMessage::OrderStatusUpdated(_) => "OrderStatusUpdatedEvent",
        }
    }

    /// Returns the order this message belongs to.
    pub fn order_id(&self) -> OrderId {
        match self {
            OutboundMessage::InventoryReservation(c) => c.order_id,
            OutboundMessage::InventoryConfirmation(c) => c.order_id,
            OutboundMessage::InventoryRelease(c) => c.order_id,
            OutboundMessage::PaymentProcessing(c) => c.order_id,
            OutboundMessage::OrderStatusUpdated(e) => e.order_id,
        }
    }
}

/// Trait for publishing orchestrator messages to downstream services.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes one message. Implementations should not retry internally;
    /// the orchestrator owns the retry policy.
    async fn publish(&self, message: OutboundMessage) -> Result<()>;
}

/// In-memory publisher for testing.
///
/// Captures every published message and can be told to fail on demand.
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    published: Arc<RwLock<Vec<OutboundMessage>>>,
    fail_on_publish: Arc<AtomicBool>,
}

impl InMemoryPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail (or succeed again).
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Returns all messages published so far, in order.
    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.published.read().await.clone()
    }

    /// Counts published messages of the given kind.
    pub async fn count_of_kind(&self, kind: &str) -> usize {
        self.published
            .read()
            .await
            .iter()
            .filter(|m| m.kind() == kind)
            .count()
    }

    /// Returns the most recently published message.
    pub async fn last(&self) -> Option<OutboundMessage> {
        self.published.read().await.last().cloned()
    }

    /// Clears the capture log.
    pub async fn clear(&self) {
        self.published.write().await.clear();
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(SagaError::Publish {
                message_kind: message.kind(),
                reason: "simulated broker failure".to_string(),
            });
        }
        self.published.write().await.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CorrelationId, CustomerId, Money};

    fn payment_command() -> OutboundMessage {
        OutboundMessage::PaymentProcessing(PaymentProcessingCommand {
            order_id: OrderId::new(),
            customer_id: CustomerId::new(),
            amount: Money::from_cents(1_000),
            correlation_id: CorrelationId::new("corr-1"),
        })
    }

    #[tokio::test]
    async fn captures_published_messages() {
        let publisher = InMemoryPublisher::new();
        publisher.publish(payment_command()).await.unwrap();
        publisher.publish(payment_command()).await.unwrap();

        assert_eq!(publisher.published().await.len(), 2);
        assert_eq!(
            publisher.count_of_kind("PaymentProcessingCommand").await,
            2
        );
        assert_eq!(
            publisher.count_of_kind("InventoryReleaseCommand").await,
            0
        );
    }

    #[tokio::test]
    async fn fails_on_demand() {
        let publisher = InMemoryPublisher::new();
        publisher.set_fail_on_publish(true);

        let result = publisher.publish(payment_command()).await;
        assert!(matches!(
            result,
            Err(SagaError::Publish {
                message_kind: "PaymentProcessingCommand",
                ..
            })
        ));
        assert!(publisher.published().await.is_empty());

        publisher.set_fail_on_publish(false);
        assert!(publisher.publish(payment_command()).await.is_ok());
    }
}
