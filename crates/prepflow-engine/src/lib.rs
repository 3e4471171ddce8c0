//! Prepflow Engine - multi-step query execution
//!
//! Executes an externally authored strategy (an ordered, dependency
//! annotated plan) against a data access tool:
//! - Resolves execution order into dependency-respecting phases
//! - Runs steps within a phase sequentially or, when explicitly marked
//!   safe, concurrently
//! - Propagates intermediate results into dependent steps' parameters
//! - Consults a reasoning backend between phases and splices in follow-up
//!   phases when the collected data looks insufficient
//! - Synthesizes a final result and tracks the execution lifecycle
//!
//! # Example
//!
//! ```rust,ignore
//! use prepflow_engine::prelude::*;
//!
//! # async fn example(tool: std::sync::Arc<dyn DataAccessTool>,
//! #                  backend: std::sync::Arc<dyn ReasoningBackend>) {
//! let orchestrator = Orchestrator::new(EngineConfig::new(), tool, backend);
//!
//! let strategy: Strategy = serde_json::from_str(plan_json).unwrap();
//! let outcome = orchestrator.execute_strategy(strategy, RequestContext::default()).await;
//!
//! assert!(outcome.is_success());
//! # }
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod analysis;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod parse;
pub mod planner;
pub mod resolve;
pub mod state;
pub mod tool;
pub mod types;

// Re-exports for convenience
pub use analysis::{AnalysisConfig, AnalysisEngine, ResultMetrics, StrategyAnalysis};
pub use error::{EngineError, ToolError};
pub use executor::StepExecutor;
pub use orchestrator::{EngineConfig, EngineStats, ExecutionStatusReport, Orchestrator};
pub use planner::plan_phases;
pub use prepflow_context::{ContextStore, ContextStoreConfig, StepResult};
pub use tool::{DataAccessTool, ReasoningBackend, StepContext};
pub use types::{
    Complexity, ExecutionHints, ExecutionId, ExecutionOutcome, ExecutionRecord, ExecutionStatus,
    RequestContext, Step, Strategy,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the engine
    pub use crate::{
        AnalysisConfig, DataAccessTool, EngineConfig, ExecutionOutcome, ExecutionStatus,
        Orchestrator, ReasoningBackend, RequestContext, Step, StepResult, Strategy,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
