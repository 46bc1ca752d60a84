//! Events consumed and commands emitted by the orchestrator.
//!
//! Delivery is at-least-once: every inbound event may arrive more than once
//! and the handlers are written to tolerate that. Every outbound message
//! carries the saga's correlation ID for end-to-end tracing.

use chrono::{DateTime, Utc};
use common::{CorrelationId, CustomerId, Money, OrderId};
use serde::{Deserialize, Serialize};

/// One line item of an order, carried through inventory commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Inbound: a new order was placed. Triggers saga creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub total_amount: Money,
    pub items: Vec<OrderItem>,
}

/// Inbound: the inventory service reserved stock for the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryReservedEvent {
    pub order_id: OrderId,
    pub reservation_id: String,
    pub correlation_id: CorrelationId,
}

/// Inbound: the inventory service could not reserve stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryReservationFailedEvent {
    pub order_id: OrderId,
    pub reason: String,
    pub correlation_id: CorrelationId,
}

/// Outcome reported by the payment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Approved,
    Completed,
    Declined,
    Failed,
}

impl PaymentStatus {
    /// Returns true if the payment went through.
    pub fn is_successful(&self) -> bool {
        matches!(self, PaymentStatus::Approved | PaymentStatus::Completed)
    }
}

/// Inbound: the payment service finished processing the charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentProcessedEvent {
    pub order_id: OrderId,
    pub payment_id: String,
    pub status: PaymentStatus,
    pub amount: Money,
    pub failure_reason: Option<String>,
    pub correlation_id: CorrelationId,
}

/// Outbound: asks the inventory service to reserve stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryReservationCommand {
    pub order_id: OrderId,
    pub items: Vec<OrderItem>,
    pub correlation_id: CorrelationId,
}

/// Outbound: asks the payment service to charge the customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentProcessingCommand {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub correlation_id: CorrelationId,
}

/// Outbound: tells the inventory service to convert the reservation into a
/// permanent allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryConfirmationCommand {
    pub order_id: OrderId,
    pub reservation_id: Option<String>,
    pub correlation_id: CorrelationId,
}

/// Outbound: tells the inventory service to release any held stock.
///
/// Always emitted during compensation, even when no reservation is known to
/// exist; releasing nothing is a harmless no-op on the inventory side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryReleaseCommand {
    pub order_id: OrderId,
    pub reservation_id: Option<String>,
    pub correlation_id: CorrelationId,
}

/// Status of an order as the order service tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Placed; the saga is still driving it.
    Pending,
    /// All saga steps finished successfully.
    Completed,
    /// The saga gave up on the order; any recorded failure reason lives on
    /// the saga record.
    Failed,
}

/// Outbound: notifies the order service that the saga moved its order from
/// one status to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusUpdatedEvent {
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
}
