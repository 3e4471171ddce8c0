//! Step and phase execution
//!
//! A failing data access call never aborts its phase or the execution: it
//! is caught at the step boundary and recorded as a failed `StepResult`.
//! Phases default to sequential execution; concurrency is opt-in via the
//! strategy's explicit parallel markers, because steps commonly carry
//! implicit ordering assumptions the planner did not express as formal
//! dependencies.

use crate::resolve::resolve_parameters;
use crate::tool::{DataAccessTool, StepContext};
use crate::types::{RequestContext, Step};
use futures::future::join_all;
use indexmap::IndexMap;
use prepflow_context::{ContextStore, StepResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Fixed confidence attached to every resolved intent
pub const STEP_CONFIDENCE: f64 = 0.9;

/// Executes resolved steps against the data access tool
#[derive(Clone)]
pub struct StepExecutor {
    tool: Arc<dyn DataAccessTool>,
    store: Arc<ContextStore>,
}

impl StepExecutor {
    /// Create an executor over a tool and context store
    #[inline]
    #[must_use]
    pub fn new(tool: Arc<dyn DataAccessTool>, store: Arc<ContextStore>) -> Self {
        Self { tool, store }
    }

    /// Execute one step
    ///
    /// Always returns a `StepResult`; tool failures are absorbed as
    /// `success == false`. The result is persisted into the context store,
    /// which also extracts entities from successful payloads.
    pub async fn execute_step(
        &self,
        step: &Step,
        execution_id: &str,
        request: &RequestContext,
        prior: &IndexMap<u32, StepResult>,
    ) -> StepResult {
        let resolved = resolve_parameters(step, prior, request);
        let resolved_value = Value::Object(resolved);

        let ctx = StepContext {
            execution_id: execution_id.to_string(),
            step_number: step.step_number,
            confidence: STEP_CONFIDENCE,
            prior_results: self
                .store
                .intermediate_snapshot(execution_id)
                .unwrap_or(Value::Null),
        };

        tracing::debug!(
            execution_id,
            step = step.step_number,
            query_type = %step.query_type,
            "executing step"
        );

        let started = Instant::now();
        let result = match self.tool.execute(&step.query_type, &resolved_value, &ctx).await {
            Ok(results) => StepResult::success(
                step.step_number,
                &step.query_type,
                &step.description,
                results,
                resolved_value,
                started.elapsed().as_millis() as u64,
            ),
            Err(err) => {
                tracing::warn!(
                    execution_id,
                    step = step.step_number,
                    error = %err,
                    "step failed; continuing"
                );
                StepResult::failure(
                    step.step_number,
                    &step.query_type,
                    &step.description,
                    err.to_string(),
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        if let Err(err) = self.store.record_step_result(execution_id, &result) {
            tracing::warn!(execution_id, error = %err, "could not record step result");
        }

        result
    }

    /// Execute one phase
    ///
    /// Concurrent only when the phase has more than one step and the
    /// strategy explicitly marked at least one of those step numbers
    /// parallelizable. Concurrency is wait-for-all-to-settle; a failing
    /// sibling never blocks or cancels the others. Results are returned in
    /// the phase's step order regardless of completion order.
    pub async fn execute_phase(
        &self,
        phase: &[Step],
        execution_id: &str,
        request: &RequestContext,
        prior: &IndexMap<u32, StepResult>,
        parallel_markers: &[u32],
    ) -> Vec<StepResult> {
        let parallel = phase.len() > 1
            && phase.iter().any(|step| parallel_markers.contains(&step.step_number));

        if parallel {
            tracing::debug!(execution_id, steps = phase.len(), "executing phase concurrently");
            join_all(
                phase
                    .iter()
                    .map(|step| self.execute_step(step, execution_id, request, prior)),
            )
            .await
        } else {
            // Sequential steps see their earlier siblings' results.
            let mut working = prior.clone();
            let mut results = Vec::with_capacity(phase.len());
            for step in phase {
                let result = self.execute_step(step, execution_id, request, &working).await;
                working.insert(result.step_number, result.clone());
                results.push(result);
            }
            results
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use parking_lot::Mutex;
    use prepflow_context::ContextStoreConfig;
    use serde_json::json;
    use std::collections::HashMap;

    /// Tool stub returning canned payloads per intent, recording calls
    struct CannedTool {
        responses: HashMap<String, Value>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl CannedTool {
        fn new(responses: HashMap<String, Value>) -> Self {
            Self {
                responses,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl DataAccessTool for CannedTool {
        async fn execute(
            &self,
            intent: &str,
            entities: &Value,
            _ctx: &StepContext,
        ) -> Result<Value, ToolError> {
            self.calls.lock().push((intent.to_string(), entities.clone()));
            self.responses
                .get(intent)
                .cloned()
                .ok_or_else(|| ToolError::DataAccess(format!("no data for {intent}")))
        }
    }

    fn harness(responses: HashMap<String, Value>) -> (StepExecutor, Arc<CannedTool>, Arc<ContextStore>) {
        let tool = Arc::new(CannedTool::new(responses));
        let store = Arc::new(ContextStore::new(ContextStoreConfig::default()));
        store.initialize("exec-1", 2, "test").unwrap();
        (StepExecutor::new(tool.clone(), store.clone()), tool, store)
    }

    #[tokio::test]
    async fn step_success_recorded_in_store() {
        let (executor, _, store) = harness(HashMap::from([(
            "find_meetings".to_string(),
            json!([{"id": "m1"}]),
        )]));

        let step = Step::new(1, "find_meetings", "find");
        let result = executor
            .execute_step(&step, "exec-1", &RequestContext::default(), &IndexMap::new())
            .await;

        assert!(result.success);
        assert_eq!(result.step_number, 1);
        assert_eq!(store.step_result("exec-1", 1), Some(json!([{"id": "m1"}])));
    }

    #[tokio::test]
    async fn step_failure_is_absorbed() {
        let (executor, _, _) = harness(HashMap::new());

        let step = Step::new(1, "find_meetings", "find");
        let result = executor
            .execute_step(&step, "exec-1", &RequestContext::default(), &IndexMap::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.step_number, 1);
        assert!(result.error.as_deref().unwrap_or_default().contains("no data"));
    }

    #[tokio::test]
    async fn dependent_step_receives_projections() {
        let (executor, tool, _) = harness(HashMap::from([
            ("find_meetings".to_string(), json!([{"id": "m1"}, {"id": "m2"}])),
            ("get_participants".to_string(), json!([{"email": "a@x.com"}])),
        ]));

        let find = Step::new(1, "find_meetings", "find");
        let who = Step::new(2, "get_participants", "who").depends_on(1);

        let mut prior = IndexMap::new();
        let first = executor
            .execute_step(&find, "exec-1", &RequestContext::default(), &prior)
            .await;
        prior.insert(1, first);
        executor
            .execute_step(&who, "exec-1", &RequestContext::default(), &prior)
            .await;

        let calls = tool.calls.lock();
        let (_, entities) = &calls[1];
        assert_eq!(entities["meetingIds"], json!(["m1", "m2"]));
    }

    #[tokio::test]
    async fn sequential_phase_propagates_sibling_results() {
        let (executor, tool, _) = harness(HashMap::from([
            ("find_meetings".to_string(), json!([{"id": "m1"}])),
            ("get_participants".to_string(), json!([])),
        ]));

        let phase = vec![
            Step::new(1, "find_meetings", "find"),
            Step::new(2, "get_participants", "who").depends_on(1),
        ];
        let results = executor
            .execute_phase(&phase, "exec-1", &RequestContext::default(), &IndexMap::new(), &[])
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));

        // The sibling's projection reached the second call even though both
        // steps landed in the same phase.
        let calls = tool.calls.lock();
        assert_eq!(calls[1].1["meetingIds"], json!(["m1"]));
    }

    #[tokio::test]
    async fn parallel_phase_settles_all_steps() {
        let (executor, _, _) = harness(HashMap::from([(
            "find_meetings".to_string(),
            json!([{"id": "m1"}]),
        )]));

        let phase = vec![
            Step::new(1, "find_meetings", "find"),
            Step::new(2, "find_documents", "docs"),
        ];
        let results = executor
            .execute_phase(
                &phase,
                "exec-1",
                &RequestContext::default(),
                &IndexMap::new(),
                &[1, 2],
            )
            .await;

        // One succeeds, one fails; both settle and come back in step order.
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].step_number, 1);
        assert!(results[0].success);
        assert_eq!(results[1].step_number, 2);
        assert!(!results[1].success);
    }
}
