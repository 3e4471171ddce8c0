//! Error types for the context store

/// Context store errors
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// No context registered for the given execution id
    #[error("unknown execution: {0}")]
    UnknownExecution(String),

    /// Context already initialized for the given execution id
    #[error("execution already initialized: {0}")]
    AlreadyInitialized(String),

    /// Context already finalized; no further writes accepted
    #[error("execution already finalized: {0}")]
    AlreadyFinalized(String),
}
