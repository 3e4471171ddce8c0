//! Error types for the engine
//!
//! The propagation policy is recover-close-to-origin:
//! - A failing data access call is absorbed into its `StepResult` and never
//!   aborts the phase or the execution.
//! - Reasoning backend failures are contained inside the analysis engine.
//! - Only errors escaping the phase loop itself escalate to an
//!   execution-level failure, and even those are folded into the structured
//!   failure outcome at the top-level boundary.

use crate::types::ExecutionStatus;
use prepflow_context::ContextError;

/// Execution-level errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An error escaped the phase/step loop
    #[error("strategy execution failed: {0}")]
    StrategyExecution(String),

    /// Context store rejected an operation
    #[error("context error: {0}")]
    Context(#[from] ContextError),

    /// Attempted state transition outside the lifecycle
    #[error("illegal state transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current status
        from: ExecutionStatus,
        /// Requested status
        to: ExecutionStatus,
    },

    /// Admission gate refused a new execution
    #[error("max concurrent executions reached ({0})")]
    AdmissionRefused(usize),

    /// Whole-run deadline expired
    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    /// Execution was cancelled while running
    #[error("execution cancelled")]
    Cancelled,

    /// No execution registered under the given id
    #[error("unknown execution: {0}")]
    UnknownExecution(String),
}

/// Collaborator call failures
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Data access tool call failed
    #[error("data access failed: {0}")]
    DataAccess(String),

    /// Reasoning backend call failed
    #[error("reasoning backend failed: {0}")]
    Reasoning(String),
}
