//! State machine trait for status enums.
//!
//! Gives dunning and subscription statuses one interface for validating and
//! performing transitions.

use super::ValidationError;

/// Trait for status enums that represent state machines.
///
/// Implementors define the transition table; validated transitions and
/// terminality come for free.
///
/// # Example
///
/// ```ignore
/// impl StateMachine for DunningStatus {
///     fn can_transition_to(&self, target: &Self) -> bool {
///         self.valid_transitions().contains(target)
///     }
///
///     fn valid_transitions(&self) -> Vec<Self> {
///         match self {
///             RetryScheduled => vec![Retrying, Recovered, Canceled],
///             // ... etc
///         }
///     }
/// }
///
/// let next = record.status.transition_to(DunningStatus::Retrying)?;
/// ```
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Returns true if transition from self to target is valid.
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Returns all valid target states from current state.
    fn valid_transitions(&self) -> Vec<Self>;

    /// Performs transition with validation, returning error if invalid.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// Checks if current state is terminal (no valid outgoing transitions).
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}
