//! Durable persistence for order saga state.
//!
//! A saga record tracks one order transaction across services. The store is
//! the single source of truth: every state transition is persisted before
//! any outbound message is sent, and writes use optimistic concurrency so
//! duplicate or racing event deliveries cannot corrupt a saga.
//!
//! Two implementations are provided:
//! - [`PostgresSagaStore`] for production
//! - [`InMemorySagaStore`] for tests

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod status;
pub mod step;
pub mod store;

pub use error::{Result, SagaStoreError};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use record::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS, SagaRecord, SagaRecordBuilder};
pub use status::SagaStatus;
pub use step::SagaStep;
pub use store::SagaStore;
