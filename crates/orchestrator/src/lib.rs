//! Order saga orchestration.
//!
//! Coordinates the distributed order transaction (reserve inventory, process
//! payment, confirm the order) against a durable [`saga_store`], with
//! compensation on failure, retry budgets, and background recovery of
//! stalled sagas.
//!
//! Handlers assume at-least-once event delivery and are idempotent: the
//! persisted saga record is the source of truth, and optimistic concurrency
//! in the store turns duplicate deliveries into dropped no-ops.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod messages;
pub mod metrics;
pub mod orchestrator;
pub mod publisher;
pub mod recovery;
pub mod schedule;

pub use config::SagaConfig;
pub use error::{Result, SagaError};
pub use lifecycle::{
    RECOVERY_EXHAUSTED_MESSAGE, RETRY_EXHAUSTED_MESSAGE, SagaLifecycle, SagaStatistics,
};
pub use messages::{
    InventoryConfirmationCommand, InventoryReleaseCommand, InventoryReservationCommand,
    InventoryReservationFailedEvent, InventoryReservedEvent, OrderCreatedEvent, OrderItem,
    OrderStatus, OrderStatusUpdatedEvent, PaymentProcessedEvent, PaymentProcessingCommand,
    PaymentStatus,
};
pub use metrics::{MetricsSnapshot, SagaMetrics};
pub use orchestrator::SagaOrchestrator;
pub use publisher::{InMemoryPublisher, MessagePublisher, OutboundMessage};
pub use recovery::{RecoveryEngine, RecoveryHandle, SweepReport};
