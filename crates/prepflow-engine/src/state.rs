//! Execution lifecycle state machine
//!
//! `Running` is the only non-terminal state. Terminal transitions move the
//! record from the active registry to history; that relocation is handled
//! by the orchestrator, this module only validates the transition itself.

use crate::error::EngineError;
use crate::types::ExecutionStatus;

/// States reachable from `from` in one transition
#[must_use]
pub fn allowed_transitions(from: ExecutionStatus) -> Vec<ExecutionStatus> {
    use ExecutionStatus::*;
    match from {
        Running => vec![Completed, Failed, Cancelled],
        Completed | Failed | Cancelled => vec![],
    }
}

/// Validates a state transition
///
/// # Errors
/// `EngineError::IllegalTransition` when `to` is not reachable from `from`.
pub fn validate_transition(
    from: ExecutionStatus,
    to: ExecutionStatus,
) -> Result<(), EngineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(EngineError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_reaches_all_terminals() {
        for to in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert!(validate_transition(ExecutionStatus::Running, to).is_ok());
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for from in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert!(allowed_transitions(from).is_empty());
            assert!(matches!(
                validate_transition(from, ExecutionStatus::Running),
                Err(EngineError::IllegalTransition { .. })
            ));
        }
    }

    #[test]
    fn self_transition_rejected() {
        assert!(validate_transition(ExecutionStatus::Running, ExecutionStatus::Running).is_err());
    }
}
