//! Collaborator interfaces
//!
//! The engine treats its two oracles as injected trait objects:
//! - the data access tool turns one step's (intent, parameters) into
//!   concrete results; its internal query construction is out of scope
//! - the reasoning backend turns aggregated data into free text that is
//!   expected (but not guaranteed) to contain JSON

use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Step-scoped context passed along with every data access call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepContext {
    /// Owning execution
    pub execution_id: String,
    /// Step being executed
    pub step_number: u32,
    /// Fixed confidence the engine attaches to resolved intents
    pub confidence: f64,
    /// Snapshot of prior step payloads and aliases
    pub prior_results: Value,
}

/// Turns a single step's (intent, parameters) into concrete results
#[async_trait::async_trait]
pub trait DataAccessTool: Send + Sync {
    /// Execute one resolved step
    ///
    /// # Errors
    /// Any failure; the engine absorbs it into a failed `StepResult`.
    async fn execute(
        &self,
        intent: &str,
        entities: &Value,
        ctx: &StepContext,
    ) -> Result<Value, ToolError>;
}

/// Judges aggregated data and proposes follow-up work
#[async_trait::async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Produce a free-text judgement for a prompt
    ///
    /// # Errors
    /// Any failure; the analysis engine converts it into a safe
    /// no-follow-up decision.
    async fn reason(&self, prompt: &str, ctx: &Value) -> Result<String, ToolError>;
}
