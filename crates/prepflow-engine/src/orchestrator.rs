//! Orchestrator
//!
//! Owns the execution registries, the admission gate, the step executor,
//! and the analysis engine. A single orchestrator is constructed at
//! process start and injected wherever needed; all registry access goes
//! through its methods.
//!
//! `execute_strategy` is the top-level entry point. It always resolves to
//! a structured outcome - success or failure shape - and never raises past
//! its own boundary.

use crate::analysis::{AnalysisConfig, AnalysisEngine};
use crate::error::EngineError;
use crate::executor::StepExecutor;
use crate::planner::plan_phases;
use crate::state::validate_transition;
use crate::tool::{DataAccessTool, ReasoningBackend};
use crate::types::{
    ExecutionFailure, ExecutionId, ExecutionOutcome, ExecutionRecord, ExecutionResults,
    ExecutionStatus, ExecutionSuccess, FailureMetadata, RequestContext, Strategy, SuccessMetadata,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use prepflow_context::{ContextStore, ContextStoreConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admission-gate limit on in-flight executions
    pub max_concurrent_executions: usize,
    /// Whole-run deadline in milliseconds
    pub max_execution_time_ms: u64,
    /// Hard ceiling on follow-up phases per execution
    pub max_follow_up_iterations: usize,
    /// Analysis thresholds and caps
    pub analysis: AnalysisConfig,
    /// Context store limits
    pub context: ContextStoreConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            max_execution_time_ms: 300_000,
            max_follow_up_iterations: 3,
            analysis: AnalysisConfig::default(),
            context: ContextStoreConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With concurrent execution limit
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_executions(mut self, max: usize) -> Self {
        self.max_concurrent_executions = max;
        self
    }

    /// With whole-run deadline in milliseconds
    #[inline]
    #[must_use]
    pub fn with_max_execution_time_ms(mut self, ms: u64) -> Self {
        self.max_execution_time_ms = ms;
        self
    }

    /// With follow-up iteration ceiling
    #[inline]
    #[must_use]
    pub fn with_max_follow_up_iterations(mut self, max: usize) -> Self {
        self.max_follow_up_iterations = max;
        self
    }

    /// With analysis configuration
    #[inline]
    #[must_use]
    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }
}

/// Administrative view of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusReport {
    /// Execution identity
    pub execution_id: String,
    /// Lifecycle status
    pub status: ExecutionStatus,
    /// Phases completed
    pub current_phase: usize,
    /// Step results recorded
    pub steps_executed: usize,
    /// Steps that succeeded
    pub successful_steps: usize,
    /// Steps that failed
    pub failed_steps: usize,
    /// When the execution was registered
    pub started_at: DateTime<Utc>,
    /// Stamped on the terminal transition
    pub ended_at: Option<DateTime<Utc>>,
}

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Currently running executions
    pub active_executions: usize,
    /// Terminal executions retained in history
    pub historical_executions: usize,
}

type RecordHandle = Arc<RwLock<ExecutionRecord>>;

/// Plans, runs, and adaptively extends strategy executions
pub struct Orchestrator {
    config: EngineConfig,
    executor: StepExecutor,
    analysis: AnalysisEngine,
    store: Arc<ContextStore>,
    active: DashMap<String, RecordHandle>,
    history: DashMap<String, RecordHandle>,
    admission: Semaphore,
}

impl Orchestrator {
    /// Create an orchestrator over the two collaborators
    #[must_use]
    pub fn new(
        config: EngineConfig,
        tool: Arc<dyn DataAccessTool>,
        backend: Arc<dyn ReasoningBackend>,
    ) -> Self {
        let store = Arc::new(ContextStore::new(config.context.clone()));
        Self {
            executor: StepExecutor::new(tool, store.clone()),
            analysis: AnalysisEngine::new(backend, store.clone(), config.analysis.clone()),
            store,
            active: DashMap::new(),
            history: DashMap::new(),
            admission: Semaphore::new(config.max_concurrent_executions),
            config,
        }
    }

    /// Execute a strategy end to end
    ///
    /// Always resolves to a structured outcome; admission refusal,
    /// timeout, cancellation, and internal errors all come back as the
    /// failure shape.
    pub async fn execute_strategy(
        &self,
        strategy: Strategy,
        request: RequestContext,
    ) -> ExecutionOutcome {
        let id = ExecutionId::new();
        let id_str = id.to_string();
        let total_steps = strategy.steps.len();

        let _permit = match self.admission.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(execution_id = %id_str, "admission refused");
                return ExecutionOutcome::Failure(ExecutionFailure {
                    execution_id: id_str,
                    success: false,
                    error: EngineError::AdmissionRefused(self.config.max_concurrent_executions)
                        .to_string(),
                    partial_results: Value::Null,
                    metadata: FailureMetadata {
                        failed_at_step: None,
                        total_steps,
                    },
                });
            }
        };

        tracing::info!(
            execution_id = %id_str,
            steps = total_steps,
            complexity = ?strategy.complexity,
            "executing strategy"
        );

        let record: RecordHandle =
            Arc::new(RwLock::new(ExecutionRecord::new(id, strategy.clone(), request.clone())));
        self.active.insert(id_str.clone(), record.clone());

        if let Err(err) =
            self.store
                .initialize(&id_str, total_steps, &request.original_query)
        {
            return self.fail_execution(&id_str, &record, err.to_string());
        }

        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.max_execution_time_ms);
        match timeout(deadline, self.run_phases(&id_str, &record, &strategy, &request)).await {
            Ok(Ok(())) => self.complete_execution(&id_str, &record, started),
            Ok(Err(EngineError::Cancelled)) => self.cancelled_outcome(&id_str, &record),
            Ok(Err(err)) => self.fail_execution(&id_str, &record, err.to_string()),
            Err(_) => self.fail_execution(
                &id_str,
                &record,
                EngineError::Timeout(self.config.max_execution_time_ms).to_string(),
            ),
        }
    }

    // The phase loop. Follow-up phases are appended while iterating, so the
    // loop is indexed rather than an iterator; the iteration ceiling bounds
    // total growth.
    async fn run_phases(
        &self,
        execution_id: &str,
        record: &RecordHandle,
        strategy: &Strategy,
        request: &RequestContext,
    ) -> Result<(), EngineError> {
        let mut phases = plan_phases(&strategy.steps);
        let markers = strategy.execution.parallel_steps.clone();
        let mut next_step_number = strategy.max_step_number() + 1;

        let mut i = 0;
        while i < phases.len() {
            // Advisory cancellation: checked between phases, never
            // interrupting an in-flight call.
            if record.read().status == ExecutionStatus::Cancelled {
                return Err(EngineError::Cancelled);
            }

            tracing::debug!(
                execution_id,
                phase = i,
                steps = phases[i].len(),
                "executing phase"
            );
            let prior = record.read().step_results.clone();
            let results = self
                .executor
                .execute_phase(&phases[i], execution_id, request, &prior, &markers)
                .await;

            {
                let mut rec = record.write();
                for result in results {
                    if let Some(error) = &result.error {
                        rec.errors
                            .push(format!("step {}: {}", result.step_number, error));
                    }
                    rec.step_results.insert(result.step_number, result);
                }
                rec.current_phase += 1;
            }

            let iterations = record.read().iteration_count;
            if i + 1 < phases.len() && iterations < self.config.max_follow_up_iterations {
                let snapshot = record.read().step_results.clone();
                let analysis = self.analysis.analyze(execution_id, &snapshot, strategy).await;
                if analysis.needs_follow_up && !analysis.follow_up_steps.is_empty() {
                    let mut follow_up = analysis.follow_up_steps;
                    for step in &mut follow_up {
                        step.step_number = next_step_number;
                        next_step_number += 1;
                    }
                    tracing::info!(
                        execution_id,
                        added = follow_up.len(),
                        reason = %analysis.reason,
                        "splicing follow-up phase"
                    );
                    phases.push(follow_up);
                    record.write().iteration_count += 1;
                } else {
                    tracing::debug!(execution_id, reason = %analysis.reason, "no follow-up");
                }
            }

            i += 1;
        }

        Ok(())
    }

    fn complete_execution(
        &self,
        execution_id: &str,
        record: &RecordHandle,
        started: Instant,
    ) -> ExecutionOutcome {
        let transitioned = {
            let mut rec = record.write();
            match validate_transition(rec.status, ExecutionStatus::Completed) {
                Ok(()) => {
                    rec.status = ExecutionStatus::Completed;
                    rec.ended_at = Some(Utc::now());
                    true
                }
                Err(_) => false,
            }
        };
        // Raced with a cancellation after the last phase.
        if !transitioned {
            return self.cancelled_outcome(execution_id, record);
        }

        let summary = self.synthesize_summary(execution_id, record);
        let intermediate = self
            .store
            .intermediate_snapshot(execution_id)
            .unwrap_or(Value::Null);
        self.retire(execution_id);

        let rec = record.read();
        let duration = started.elapsed().as_millis() as u64;
        tracing::info!(
            execution_id,
            steps = rec.step_results.len(),
            successful = rec.successful_steps(),
            failed = rec.failed_steps(),
            duration_ms = duration,
            "execution completed"
        );

        ExecutionOutcome::Success(ExecutionSuccess {
            execution_id: execution_id.to_string(),
            success: true,
            results: ExecutionResults {
                summary,
                step_results: rec.step_results.values().cloned().collect(),
                successful_steps: rec.successful_steps(),
                failed_steps: rec.failed_steps(),
                total_duration: duration,
                iteration_count: rec.iteration_count,
            },
            intermediate_results: intermediate,
            metadata: SuccessMetadata {
                duration,
                steps_executed: rec.step_results.len(),
                total_steps: rec.metadata.total_steps,
                iterations_performed: rec.iteration_count,
            },
        })
    }

    fn fail_execution(
        &self,
        execution_id: &str,
        record: &RecordHandle,
        error: String,
    ) -> ExecutionOutcome {
        tracing::error!(execution_id, error = %error, "execution failed");
        {
            let mut rec = record.write();
            if validate_transition(rec.status, ExecutionStatus::Failed).is_ok() {
                rec.status = ExecutionStatus::Failed;
                rec.ended_at = Some(Utc::now());
            }
            rec.errors.push(error.clone());
        }
        self.retire(execution_id);

        let rec = record.read();
        ExecutionOutcome::Failure(ExecutionFailure {
            execution_id: execution_id.to_string(),
            success: false,
            error,
            partial_results: self
                .store
                .intermediate_snapshot(execution_id)
                .unwrap_or(Value::Null),
            metadata: FailureMetadata {
                failed_at_step: Some(rec.step_results.len()),
                total_steps: rec.metadata.total_steps,
            },
        })
    }

    // The record was already retired by `cancel_execution`; only build the
    // outcome here.
    fn cancelled_outcome(&self, execution_id: &str, record: &RecordHandle) -> ExecutionOutcome {
        let rec = record.read();
        ExecutionOutcome::Failure(ExecutionFailure {
            execution_id: execution_id.to_string(),
            success: false,
            error: EngineError::Cancelled.to_string(),
            partial_results: self
                .store
                .intermediate_snapshot(execution_id)
                .unwrap_or(Value::Null),
            metadata: FailureMetadata {
                failed_at_step: Some(rec.step_results.len()),
                total_steps: rec.metadata.total_steps,
            },
        })
    }

    // Terminal relocation: active registry -> history registry, context
    // finalized.
    fn retire(&self, execution_id: &str) {
        if let Some((key, record)) = self.active.remove(execution_id) {
            self.history.insert(key, record);
        }
        self.store.finalize(execution_id);
    }

    fn synthesize_summary(&self, execution_id: &str, record: &RecordHandle) -> String {
        let rec = record.read();
        let mut summary = format!(
            "Executed {} of {} planned steps: {} succeeded, {} failed.",
            rec.step_results.len(),
            rec.metadata.total_steps,
            rec.successful_steps(),
            rec.failed_steps(),
        );
        if rec.iteration_count > 0 {
            summary.push_str(&format!(
                " Spliced in {} follow-up phase(s).",
                rec.iteration_count
            ));
        }
        if let Some(context) = self.store.build_context_summary(execution_id) {
            summary.push('\n');
            summary.push_str(&context);
        }
        summary
    }

    /// Request cancellation of a running execution
    ///
    /// Advisory only: flips the status and stops further phase scheduling,
    /// but never interrupts a call already in flight. Returns `false` for
    /// unknown (or already terminal) ids.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        match self.active.remove(execution_id) {
            Some((key, record)) => {
                {
                    let mut rec = record.write();
                    if validate_transition(rec.status, ExecutionStatus::Cancelled).is_ok() {
                        rec.status = ExecutionStatus::Cancelled;
                        rec.ended_at = Some(Utc::now());
                    }
                }
                self.store.finalize(&key);
                self.history.insert(key, record);
                tracing::info!(execution_id, "execution cancelled");
                true
            }
            None => false,
        }
    }

    /// Status of an active or historical execution
    #[must_use]
    pub fn execution_status(&self, execution_id: &str) -> Option<ExecutionStatusReport> {
        let record = self
            .active
            .get(execution_id)
            .or_else(|| self.history.get(execution_id))?;
        let rec = record.read();
        Some(ExecutionStatusReport {
            execution_id: execution_id.to_string(),
            status: rec.status,
            current_phase: rec.current_phase,
            steps_executed: rec.step_results.len(),
            successful_steps: rec.successful_steps(),
            failed_steps: rec.failed_steps(),
            started_at: rec.started_at,
            ended_at: rec.ended_at,
        })
    }

    /// Currently running executions
    #[inline]
    #[must_use]
    pub fn active_executions_count(&self) -> usize {
        self.active.len()
    }

    /// Ids of currently running executions
    #[must_use]
    pub fn active_execution_ids(&self) -> Vec<String> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop history entries older than `max_age_ms`, returning the count
    pub fn cleanup_history(&self, max_age_ms: u64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::milliseconds(max_age_ms as i64);
        let expired: Vec<String> = self
            .history
            .iter()
            .filter(|entry| {
                let rec = entry.value().read();
                rec.ended_at.unwrap_or(rec.started_at) < cutoff
            })
            .map(|entry| entry.key().clone())
            .collect();
        for key in &expired {
            self.history.remove(key);
        }
        expired.len()
    }

    /// Registry statistics
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active_executions: self.active.len(),
            historical_executions: self.history.len(),
        }
    }

    /// The shared context store
    #[inline]
    #[must_use]
    pub fn context_store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
