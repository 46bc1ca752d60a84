//! Saga step state machine.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaStoreError};

/// The step a saga is currently executing.
///
/// Forward path:
/// ```text
/// InventoryReservation ──► PaymentProcessing ──► OrderConfirmation ──► Completed
/// ```
/// Any non-terminal step may instead divert to `Compensating ──► Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStep {
    /// Reserve inventory for the order items.
    InventoryReservation,

    /// Process payment for the order.
    PaymentProcessing,

    /// Confirm the order and finalize the transaction.
    OrderConfirmation,

    /// Compensating actions (rollback) are being executed.
    Compensating,

    /// Saga completed successfully (terminal).
    Completed,

    /// Saga failed and could not be recovered (terminal).
    Failed,
}

impl SagaStep {
    /// Returns the next step in the flow.
    ///
    /// Fails with `IllegalStateTransition` when called on a terminal step.
    pub fn next(&self) -> Result<SagaStep> {
        match self {
            SagaStep::InventoryReservation => Ok(SagaStep::PaymentProcessing),
            SagaStep::PaymentProcessing => Ok(SagaStep::OrderConfirmation),
            SagaStep::OrderConfirmation => Ok(SagaStep::Completed),
            SagaStep::Compensating => Ok(SagaStep::Failed),
            SagaStep::Completed | SagaStep::Failed => {
                Err(SagaStoreError::IllegalStateTransition { from: *self })
            }
        }
    }

    /// Returns true if this is a terminal step (saga execution finished).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStep::Completed | SagaStep::Failed)
    }

    /// Returns true if this step is part of the compensation flow.
    pub fn is_compensation(&self) -> bool {
        matches!(self, SagaStep::Compensating | SagaStep::Failed)
    }

    /// Returns true if this step can be retried after a failure.
    pub fn can_retry(&self) -> bool {
        !self.is_terminal() && !self.is_compensation()
    }

    /// Execution order of this step, used when ordering recovery work.
    pub fn execution_order(&self) -> u8 {
        match self {
            SagaStep::InventoryReservation => 1,
            SagaStep::PaymentProcessing => 2,
            SagaStep::OrderConfirmation => 3,
            SagaStep::Compensating => 4,
            SagaStep::Completed => 5,
            SagaStep::Failed => 6,
        }
    }

    /// Returns the step name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::InventoryReservation => "InventoryReservation",
            SagaStep::PaymentProcessing => "PaymentProcessing",
            SagaStep::OrderConfirmation => "OrderConfirmation",
            SagaStep::Compensating => "Compensating",
            SagaStep::Completed => "Completed",
            SagaStep::Failed => "Failed",
        }
    }

    /// Parses a step from its string name.
    pub fn parse(s: &str) -> Option<SagaStep> {
        match s {
            "InventoryReservation" => Some(SagaStep::InventoryReservation),
            "PaymentProcessing" => Some(SagaStep::PaymentProcessing),
            "OrderConfirmation" => Some(SagaStep::OrderConfirmation),
            "Compensating" => Some(SagaStep::Compensating),
            "Completed" => Some(SagaStep::Completed),
            "Failed" => Some(SagaStep::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        assert_eq!(
            SagaStep::InventoryReservation.next().unwrap(),
            SagaStep::PaymentProcessing
        );
        assert_eq!(
            SagaStep::PaymentProcessing.next().unwrap(),
            SagaStep::OrderConfirmation
        );
        assert_eq!(
            SagaStep::OrderConfirmation.next().unwrap(),
            SagaStep::Completed
        );
    }

    #[test]
    fn test_compensating_leads_to_failed() {
        assert_eq!(SagaStep::Compensating.next().unwrap(), SagaStep::Failed);
    }

    #[test]
    fn test_no_next_step_from_terminal() {
        assert!(matches!(
            SagaStep::Completed.next(),
            Err(SagaStoreError::IllegalStateTransition {
                from: SagaStep::Completed
            })
        ));
        assert!(matches!(
            SagaStep::Failed.next(),
            Err(SagaStoreError::IllegalStateTransition {
                from: SagaStep::Failed
            })
        ));
    }

    #[test]
    fn test_terminal_steps() {
        assert!(!SagaStep::InventoryReservation.is_terminal());
        assert!(!SagaStep::PaymentProcessing.is_terminal());
        assert!(!SagaStep::OrderConfirmation.is_terminal());
        assert!(!SagaStep::Compensating.is_terminal());
        assert!(SagaStep::Completed.is_terminal());
        assert!(SagaStep::Failed.is_terminal());
    }

    #[test]
    fn test_compensation_steps() {
        assert!(SagaStep::Compensating.is_compensation());
        assert!(SagaStep::Failed.is_compensation());
        assert!(!SagaStep::InventoryReservation.is_compensation());
        assert!(!SagaStep::Completed.is_compensation());
    }

    #[test]
    fn test_retryable_steps() {
        assert!(SagaStep::InventoryReservation.can_retry());
        assert!(SagaStep::PaymentProcessing.can_retry());
        assert!(SagaStep::OrderConfirmation.can_retry());
        assert!(!SagaStep::Compensating.can_retry());
        assert!(!SagaStep::Completed.can_retry());
        assert!(!SagaStep::Failed.can_retry());
    }

    #[test]
    fn test_execution_order_is_monotonic_on_forward_path() {
        let mut step = SagaStep::InventoryReservation;
        while !step.is_terminal() && step != SagaStep::Compensating {
            let next = step.next().unwrap();
            assert!(next.execution_order() > step.execution_order());
            step = next;
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        for step in [
            SagaStep::InventoryReservation,
            SagaStep::PaymentProcessing,
            SagaStep::OrderConfirmation,
            SagaStep::Compensating,
            SagaStep::Completed,
            SagaStep::Failed,
        ] {
            assert_eq!(SagaStep::parse(step.as_str()), Some(step));
        }
        assert_eq!(SagaStep::parse("NotAStep"), None);
    }

    #[test]
    fn test_serialization() {
        let step = SagaStep::PaymentProcessing;
        let json = serde_json::to_string(&step).unwrap();
        let deserialized: SagaStep = serde_json::from_str(&json).unwrap();
        assert_eq!(step, deserialized);
    }
}
