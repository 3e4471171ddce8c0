//! Core types for the engine
//!
//! The boundary types (`Strategy`, `Step`, the outcome shapes) mirror the
//! JSON produced and consumed upstream, so they serialize camelCase.
//! Optional plan fields default once here, at the boundary, rather than
//! being presence-checked throughout the logic.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use prepflow_context::StepResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Unique execution identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Ulid);

impl ExecutionId {
    /// Generate new execution ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strategy complexity as judged by the upstream planner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Few steps, no verification expected
    Low,
    /// Typical plan
    #[default]
    Medium,
    /// Warrants an extra verification pass even when metrics look fine
    High,
}

/// Explicit execution hints carried by a strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHints {
    /// Step numbers the planner marked safe to run concurrently
    #[serde(default)]
    pub parallel_steps: Vec<u32>,
}

/// One unit of work in a strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique within the strategy, not necessarily sequential
    pub step_number: u32,
    /// Human-readable description
    pub description: String,
    /// Intent identifier understood by the data access tool
    pub query_type: String,
    /// Literal parameters; values may carry `stepN_results` markers
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
    /// Step numbers this step depends on
    #[serde(default)]
    pub dependencies: Vec<u32>,
    /// Upstream time estimate, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
}

impl Step {
    /// Create a step with no parameters or dependencies
    #[must_use]
    pub fn new(step_number: u32, query_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_number,
            description: description.into(),
            query_type: query_type.into(),
            parameters: serde_json::Map::new(),
            dependencies: Vec::new(),
            estimated_time: None,
        }
    }

    /// With a dependency
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, step_number: u32) -> Self {
        self.dependencies.push(step_number);
        self
    }

    /// With a literal parameter
    #[inline]
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// An ordered, dependency-annotated plan produced by the external planner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    /// Free-text rationale from the planner
    #[serde(default)]
    pub analysis: String,
    /// What a complete answer should contain
    #[serde(default)]
    pub expected_outcome: String,
    /// Planner-judged complexity
    #[serde(default)]
    pub complexity: Complexity,
    /// The plan itself
    pub steps: Vec<Step>,
    /// Optional execution hints; defaults to no parallel steps
    #[serde(default)]
    pub execution: ExecutionHints,
}

impl Strategy {
    /// Create a strategy from steps alone
    #[must_use]
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            analysis: String::new(),
            expected_outcome: String::new(),
            complexity: Complexity::default(),
            steps,
            execution: ExecutionHints::default(),
        }
    }

    /// With complexity
    #[inline]
    #[must_use]
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// With parallel step markers
    #[inline]
    #[must_use]
    pub fn with_parallel_steps(mut self, steps: Vec<u32>) -> Self {
        self.execution.parallel_steps = steps;
        self
    }

    /// Highest step number in the plan (0 for an empty plan)
    #[must_use]
    pub fn max_step_number(&self) -> u32 {
        self.steps.iter().map(|s| s.step_number).max().unwrap_or(0)
    }
}

/// Caller-side context accompanying one request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Caller identity, merged into resolved parameters
    #[serde(default)]
    pub user_email: Option<String>,
    /// The original natural-language query
    #[serde(default)]
    pub original_query: String,
}

impl RequestContext {
    /// Create a context for a query
    #[must_use]
    pub fn for_query(query: impl Into<String>) -> Self {
        Self {
            user_email: None,
            original_query: query.into(),
        }
    }

    /// With caller identity
    #[inline]
    #[must_use]
    pub fn with_user_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }
}

/// Lifecycle status of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Phases are being executed
    Running,
    /// Final results synthesized
    Completed,
    /// An error escaped the phase loop
    Failed,
    /// Explicitly cancelled while running
    Cancelled,
}

impl ExecutionStatus {
    /// True for the three terminal states
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Execution-level metadata captured at registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    /// Steps in the original strategy
    pub total_steps: usize,
    /// Planner-judged complexity
    pub complexity: Complexity,
    /// Step numbers marked parallelizable
    pub parallel_step_numbers: Vec<u32>,
}

/// One run of a strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Execution identity
    pub id: ExecutionId,
    /// The strategy under execution (immutable for the run)
    pub strategy: Strategy,
    /// Caller context
    pub request_context: RequestContext,
    /// Lifecycle status
    pub status: ExecutionStatus,
    /// Phases completed so far
    pub current_phase: usize,
    /// Results keyed by step number, append-only
    pub step_results: IndexMap<u32, StepResult>,
    /// Step-level error messages, in arrival order
    pub errors: Vec<String>,
    /// Registration metadata
    pub metadata: ExecutionMetadata,
    /// Follow-up phases spliced in so far
    pub iteration_count: usize,
    /// When the execution was registered
    pub started_at: DateTime<Utc>,
    /// Stamped on the terminal transition
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Register a new running execution
    #[must_use]
    pub fn new(id: ExecutionId, strategy: Strategy, request_context: RequestContext) -> Self {
        let metadata = ExecutionMetadata {
            total_steps: strategy.steps.len(),
            complexity: strategy.complexity,
            parallel_step_numbers: strategy.execution.parallel_steps.clone(),
        };
        Self {
            id,
            strategy,
            request_context,
            status: ExecutionStatus::Running,
            current_phase: 0,
            step_results: IndexMap::new(),
            errors: Vec::new(),
            metadata,
            iteration_count: 0,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Count of successful step results
    #[must_use]
    pub fn successful_steps(&self) -> usize {
        self.step_results.values().filter(|r| r.success).count()
    }

    /// Count of failed step results
    #[must_use]
    pub fn failed_steps(&self) -> usize {
        self.step_results.values().filter(|r| !r.success).count()
    }
}

/// Aggregate results carried by a successful outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResults {
    /// Synthesized summary of the run
    pub summary: String,
    /// All step results, in step-number order
    pub step_results: Vec<StepResult>,
    /// Steps that succeeded
    pub successful_steps: usize,
    /// Steps that failed
    pub failed_steps: usize,
    /// Wall-clock duration of the run, in milliseconds
    pub total_duration: u64,
    /// Follow-up phases spliced in
    pub iteration_count: usize,
}

/// Metadata carried by a successful outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessMetadata {
    /// Wall-clock duration in milliseconds
    pub duration: u64,
    /// Step results recorded
    pub steps_executed: usize,
    /// Steps in the original strategy
    pub total_steps: usize,
    /// Follow-up phases spliced in
    pub iterations_performed: usize,
}

/// Metadata carried by a failure outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureMetadata {
    /// Step results recorded when the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at_step: Option<usize>,
    /// Steps in the original strategy
    pub total_steps: usize,
}

/// Successful outcome shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSuccess {
    /// Execution identity
    pub execution_id: String,
    /// Always `true`
    pub success: bool,
    /// Aggregate results
    pub results: ExecutionResults,
    /// Snapshot of step payloads and aliases
    pub intermediate_results: Value,
    /// Run metadata
    pub metadata: SuccessMetadata,
}

/// Failure outcome shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    /// Execution identity
    pub execution_id: String,
    /// Always `false`
    pub success: bool,
    /// What went wrong
    pub error: String,
    /// Whatever was gathered before the failure
    pub partial_results: Value,
    /// Failure metadata
    pub metadata: FailureMetadata,
}

/// Structured result of `execute_strategy`
///
/// The entry point never raises past its own boundary; it always resolves
/// to one of these two shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionOutcome {
    /// Run completed and synthesized results
    Success(ExecutionSuccess),
    /// Run was refused, failed, timed out, or was cancelled
    Failure(ExecutionFailure),
}

impl ExecutionOutcome {
    /// True for the success shape
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Execution id regardless of shape
    #[must_use]
    pub fn execution_id(&self) -> &str {
        match self {
            Self::Success(s) => &s.execution_id,
            Self::Failure(f) => &f.execution_id,
        }
    }

    /// Success payload, when present
    #[must_use]
    pub fn as_success(&self) -> Option<&ExecutionSuccess> {
        match self {
            Self::Success(s) => Some(s),
            Self::Failure(_) => None,
        }
    }

    /// Failure payload, when present
    #[must_use]
    pub fn as_failure(&self) -> Option<&ExecutionFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execution_id_generation() {
        let id1 = ExecutionId::new();
        let id2 = ExecutionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn strategy_deserializes_with_defaults() {
        let strategy: Strategy = serde_json::from_value(json!({
            "steps": [
                {"stepNumber": 1, "description": "find", "queryType": "find_meetings"}
            ]
        }))
        .unwrap();

        assert_eq!(strategy.complexity, Complexity::Medium);
        assert!(strategy.execution.parallel_steps.is_empty());
        assert!(strategy.steps[0].dependencies.is_empty());
        assert!(strategy.steps[0].parameters.is_empty());
    }

    #[test]
    fn strategy_parses_full_shape() {
        let strategy: Strategy = serde_json::from_value(json!({
            "analysis": "needs meetings then people",
            "expectedOutcome": "participant list",
            "complexity": "high",
            "steps": [
                {"stepNumber": 1, "description": "find", "queryType": "find_meetings",
                 "parameters": {"timeframe": "next_week"}, "dependencies": []},
                {"stepNumber": 2, "description": "who", "queryType": "get_participants",
                 "parameters": {}, "dependencies": [1], "estimatedTime": "2s"}
            ],
            "execution": {"parallelSteps": [1, 2]}
        }))
        .unwrap();

        assert_eq!(strategy.complexity, Complexity::High);
        assert_eq!(strategy.execution.parallel_steps, vec![1, 2]);
        assert_eq!(strategy.steps[1].dependencies, vec![1]);
        assert_eq!(strategy.max_step_number(), 2);
    }

    #[test]
    fn status_terminality() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn record_counts_successes_and_failures() {
        let strategy = Strategy::from_steps(vec![Step::new(1, "find_meetings", "find")]);
        let mut record = ExecutionRecord::new(ExecutionId::new(), strategy, RequestContext::default());

        record.step_results.insert(
            1,
            StepResult::success(1, "find_meetings", "find", Value::Null, Value::Null, 1),
        );
        record
            .step_results
            .insert(2, StepResult::failure(2, "get_participants", "who", "boom", 1));

        assert_eq!(record.successful_steps(), 1);
        assert_eq!(record.failed_steps(), 1);
    }

    #[test]
    fn outcome_serializes_camel_case_keys() {
        let outcome = ExecutionOutcome::Failure(ExecutionFailure {
            execution_id: "x".to_string(),
            success: false,
            error: "boom".to_string(),
            partial_results: Value::Null,
            metadata: FailureMetadata {
                failed_at_step: Some(1),
                total_steps: 2,
            },
        });

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["metadata"]["failedAtStep"], json!(1));
        assert_eq!(value["metadata"]["totalSteps"], json!(2));
    }
}
