use common::{OrderId, SagaId};
use thiserror::Error;

use crate::step::SagaStep;

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// An active (non-terminal) saga already exists for the order.
    #[error("Active saga already exists for order: {order_id}")]
    DuplicateActiveSaga { order_id: OrderId },

    /// The saga was not found in the store.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// The requested step transition is not allowed from the current step.
    #[error("Cannot advance from terminal step: {from}")]
    IllegalStateTransition { from: SagaStep },

    /// A concurrency conflict occurred when updating a saga record.
    /// The expected version did not match the actual version.
    #[error("Concurrency conflict for saga {saga_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: i64,
        actual: i64,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;
