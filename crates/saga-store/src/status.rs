//! Saga status state machine.

use serde::{Deserialize, Serialize};

/// The overall status of a saga in its lifecycle.
///
/// Status transitions:
/// ```text
/// Initiated ──► InProgress ──┬──► Completed
///                            ├──► Failed
///                            └──► Compensating ──► Compensated | Failed
/// ```
///
/// Terminal statuses: `Completed`, `Failed`, `Compensated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Saga has been created and is ready to start execution.
    Initiated,

    /// Saga is currently executing steps.
    InProgress,

    /// Saga completed successfully (terminal).
    Completed,

    /// Saga failed and cannot be recovered (terminal).
    Failed,

    /// Saga is executing compensation actions due to a failure.
    Compensating,

    /// Saga finished its compensation actions (terminal).
    Compensated,
}

impl SagaStatus {
    /// Returns true if this is a terminal status (saga execution finished).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated
        )
    }

    /// Returns true if this status represents an error path.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SagaStatus::Failed | SagaStatus::Compensating | SagaStatus::Compensated
        )
    }

    /// Returns true if recovery logic should consider sagas in this status.
    pub fn can_be_recovered(&self) -> bool {
        matches!(self, SagaStatus::InProgress | SagaStatus::Compensating)
    }

    /// Returns true if this saga is in an active (non-terminal) status.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Initiated => "Initiated",
            SagaStatus::InProgress => "InProgress",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
        }
    }

    /// Parses a status from its string name.
    pub fn parse(s: &str) -> Option<SagaStatus> {
        match s {
            "Initiated" => Some(SagaStatus::Initiated),
            "InProgress" => Some(SagaStatus::InProgress),
            "Completed" => Some(SagaStatus::Completed),
            "Failed" => Some(SagaStatus::Failed),
            "Compensating" => Some(SagaStatus::Compensating),
            "Compensated" => Some(SagaStatus::Compensated),
            _ => None,
        }
    }

    /// All statuses considered by recovery sweeps.
    pub fn recovery_statuses() -> [SagaStatus; 3] {
        [
            SagaStatus::Initiated,
            SagaStatus::InProgress,
            SagaStatus::Compensating,
        ]
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
