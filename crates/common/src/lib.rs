//! Shared value objects for the order saga system.

pub mod types;

pub use types::{CorrelationId, CustomerId, Money, OrderId, SagaId};
