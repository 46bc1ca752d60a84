//! Error types for saga orchestration.

use common::SagaId;
use saga_store::SagaStoreError;
use thiserror::Error;

/// Errors that can occur while orchestrating sagas.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The underlying saga store failed.
    #[error("saga store error: {0}")]
    Store(#[from] SagaStoreError),

    /// An outbound message could not be delivered.
    #[error("failed to publish {message_kind}: {reason}")]
    Publish {
        message_kind: &'static str,
        reason: String,
    },

    /// The saga record is missing data a handler depends on.
    #[error("saga {saga_id} is missing required data key '{key}'")]
    MissingSagaData { saga_id: SagaId, key: String },

    /// Serialization of saga data failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if this error means another handler already applied the
    /// same transition, i.e. a duplicate or racing event delivery.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            SagaError::Store(SagaStoreError::ConcurrencyConflict { .. })
        )
    }
}

/// Convenience result type for saga orchestration operations.
pub type Result<T> = std::result::Result<T, SagaError>;
