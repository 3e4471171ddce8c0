//! Analysis engine
//!
//! Judges whether the results gathered so far are sufficient and proposes
//! bounded follow-up steps when they are not. Two passes:
//! - deterministic metrics over the collected results (safe on empty
//!   input: everything degrades to 0, never NaN or infinity)
//! - a qualitative judgement from the reasoning backend, parsed
//!   tolerantly with a fixed fallback
//!
//! Every backend failure is contained here and converted into a safe
//! no-follow-up decision; nothing escalates to the orchestrator.

use crate::parse::extract_json;
use crate::tool::ReasoningBackend;
use crate::types::{Complexity, Step, Strategy};
use chrono::Utc;
use indexmap::IndexMap;
use prepflow_context::entity::{EntityCache, EntityCategory};
use prepflow_context::{ContextStore, StepResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reason returned by the guard clause when too few results exist
pub const INSUFFICIENT_RESULTS_REASON: &str = "Insufficient successful results for analysis";

/// Analysis engine thresholds and caps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Completeness below this triggers follow-up
    pub completeness_threshold: f64,
    /// Confidence below this triggers follow-up
    pub confidence_threshold: f64,
    /// Hard cap on follow-up steps per analysis call
    pub max_follow_up_steps: usize,
    /// Minimum successful results before the reasoning pass runs
    pub min_results_for_analysis: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            completeness_threshold: 0.8,
            confidence_threshold: 0.7,
            max_follow_up_steps: 3,
            min_results_for_analysis: 1,
        }
    }
}

impl AnalysisConfig {
    /// Create default thresholds
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With completeness threshold
    #[inline]
    #[must_use]
    pub fn with_completeness_threshold(mut self, threshold: f64) -> Self {
        self.completeness_threshold = threshold;
        self
    }

    /// With confidence threshold
    #[inline]
    #[must_use]
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// With follow-up step cap
    #[inline]
    #[must_use]
    pub fn with_max_follow_up_steps(mut self, max: usize) -> Self {
        self.max_follow_up_steps = max;
        self
    }
}

/// Deterministic metrics over collected step results
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetrics {
    /// Mean of success ratio and the any-results indicator
    pub confidence: f64,
    /// Blend of result coverage and entity diversity
    pub completeness: f64,
    /// Success ratio
    pub data_quality: f64,
    /// Fraction of entity categories with at least one instance
    pub entity_diversity: f64,
}

/// Compute metrics over the results gathered so far
///
/// Empty input yields all zeroes; no division produces NaN or infinity.
#[must_use]
pub fn compute_metrics(step_results: &IndexMap<u32, StepResult>) -> ResultMetrics {
    let total = step_results.len();
    if total == 0 {
        return ResultMetrics::default();
    }

    let successful: Vec<&StepResult> = step_results.values().filter(|r| r.success).collect();
    let success_ratio = successful.len() as f64 / total as f64;
    let any_results = if successful.iter().any(|r| payload_has_data(&r.results)) {
        1.0
    } else {
        0.0
    };

    let mut cache = EntityCache::new();
    let now = Utc::now();
    for result in &successful {
        cache.merge_from_results(&result.results, now);
    }
    let entity_diversity = cache.diversity();

    ResultMetrics {
        confidence: (success_ratio + any_results) / 2.0,
        completeness: 0.6 * success_ratio + 0.4 * entity_diversity,
        data_quality: success_ratio,
        entity_diversity,
    }
}

fn payload_has_data(results: &Value) -> bool {
    match results {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Structured judgement expected from the reasoning backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReasoningJudgement {
    /// Narrative summary of the collected data
    pub summary: String,
    /// Qualitative completeness, 0 to 1
    pub completeness: f64,
    /// Notable observations
    pub insights: Vec<String>,
    /// Missing data the backend identified
    pub gaps: Vec<String>,
    /// Suggested next actions
    pub recommendations: Vec<String>,
    /// Backend's own follow-up opinion (advisory; the deterministic
    /// decision below governs)
    pub needs_follow_up: bool,
    /// Backend's stated reason
    pub follow_up_reason: String,
}

impl Default for ReasoningJudgement {
    fn default() -> Self {
        Self {
            summary: String::new(),
            completeness: 0.5,
            insights: Vec::new(),
            gaps: Vec::new(),
            recommendations: Vec::new(),
            needs_follow_up: false,
            follow_up_reason: String::new(),
        }
    }
}

impl ReasoningJudgement {
    /// Fixed fallback used when the backend's output does not parse
    #[must_use]
    pub fn parse_fallback() -> Self {
        Self {
            summary: "Analysis parsing failed".to_string(),
            completeness: 0.5,
            gaps: vec!["Analysis parsing error".to_string()],
            ..Self::default()
        }
    }
}

/// Outcome of one analysis pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyAnalysis {
    /// Whether the plan should grow a follow-up phase
    pub needs_follow_up: bool,
    /// Human-readable reason for the decision
    pub reason: String,
    /// Proposed follow-up steps, capped at the configured maximum
    pub follow_up_steps: Vec<Step>,
    /// Deterministic confidence metric
    pub confidence: f64,
    /// Completeness backing the decision
    pub completeness: f64,
    /// Insights from the qualitative pass
    pub insights: Vec<String>,
    /// Gaps from the qualitative pass
    pub gaps: Vec<String>,
}

impl StrategyAnalysis {
    fn no_follow_up(reason: impl Into<String>, confidence: f64, completeness: f64) -> Self {
        Self {
            needs_follow_up: false,
            reason: reason.into(),
            follow_up_steps: Vec::new(),
            confidence,
            completeness,
            insights: Vec::new(),
            gaps: Vec::new(),
        }
    }
}

/// Judges completeness of collected results and proposes follow-up steps
pub struct AnalysisEngine {
    backend: Arc<dyn ReasoningBackend>,
    store: Arc<ContextStore>,
    config: AnalysisConfig,
}

impl AnalysisEngine {
    /// Create an engine over a reasoning backend and context store
    #[inline]
    #[must_use]
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        store: Arc<ContextStore>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            backend,
            store,
            config,
        }
    }

    /// Analyze the results gathered so far
    ///
    /// Never fails: backend errors and unparsable responses degrade to a
    /// safe no-follow-up decision or the fixed fallback judgement.
    pub async fn analyze(
        &self,
        execution_id: &str,
        step_results: &IndexMap<u32, StepResult>,
        strategy: &Strategy,
    ) -> StrategyAnalysis {
        let successful = step_results.values().filter(|r| r.success).count();
        if successful < self.config.min_results_for_analysis {
            return StrategyAnalysis::no_follow_up(INSUFFICIENT_RESULTS_REASON, 0.0, 0.0);
        }

        let metrics = compute_metrics(step_results);
        let prompt = self.build_analysis_prompt(execution_id, step_results, strategy);

        let response = match self
            .backend
            .reason(&prompt, &json!({ "executionId": execution_id }))
            .await
        {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(execution_id, error = %err, "reasoning backend failed; skipping follow-up");
                return StrategyAnalysis::no_follow_up(
                    "Reasoning backend unavailable",
                    metrics.confidence,
                    metrics.completeness,
                );
            }
        };

        let judgement = Self::parse_judgement(&response);
        if !judgement.summary.is_empty() {
            let _ = self
                .store
                .push_conversation(execution_id, "analysis", &judgement.summary);
        }

        let (needs_follow_up, reason) = self.evaluate_follow_up_need(
            judgement.completeness,
            metrics.confidence,
            &judgement.gaps,
            strategy.complexity,
        );

        let follow_up_steps = if needs_follow_up {
            self.generate_follow_up_steps(execution_id, &judgement.gaps, &judgement.recommendations)
                .await
        } else {
            Vec::new()
        };

        StrategyAnalysis {
            needs_follow_up,
            reason,
            follow_up_steps,
            confidence: metrics.confidence,
            completeness: judgement.completeness,
            insights: judgement.insights,
            gaps: judgement.gaps,
        }
    }

    /// Deterministic follow-up decision
    ///
    /// Triggers, in order: low completeness, low confidence, non-empty
    /// gaps, high complexity. Each yields a distinct reason; when none
    /// trigger the reason is exactly "Analysis appears complete".
    #[must_use]
    pub fn evaluate_follow_up_need(
        &self,
        completeness: f64,
        confidence: f64,
        gaps: &[String],
        complexity: Complexity,
    ) -> (bool, String) {
        if completeness < self.config.completeness_threshold {
            return (
                true,
                format!(
                    "Low completeness score: {completeness:.2} below threshold {:.2}",
                    self.config.completeness_threshold
                ),
            );
        }
        if confidence < self.config.confidence_threshold {
            return (
                true,
                format!(
                    "Low confidence score: {confidence:.2} below threshold {:.2}",
                    self.config.confidence_threshold
                ),
            );
        }
        if !gaps.is_empty() {
            return (true, format!("Identified data gaps: {}", gaps.join("; ")));
        }
        if complexity == Complexity::High {
            return (
                true,
                "High complexity strategy warrants additional verification".to_string(),
            );
        }
        (false, "Analysis appears complete".to_string())
    }

    /// Ask the backend for concrete next steps
    ///
    /// Truncates to the configured maximum regardless of how many the
    /// backend proposes. Backend failure yields an empty list.
    pub async fn generate_follow_up_steps(
        &self,
        execution_id: &str,
        gaps: &[String],
        recommendations: &[String],
    ) -> Vec<Step> {
        let prompt = format!(
            "Given these gaps in the collected meeting data:\n{}\n\n\
             And these recommendations:\n{}\n\n\
             Propose concrete follow-up query steps as a JSON array. Each step:\n\
             {{\"description\": \"...\", \"queryType\": \"...\", \"parameters\": {{}}}}",
            bullet_list(gaps),
            bullet_list(recommendations),
        );

        let response = match self
            .backend
            .reason(&prompt, &json!({ "executionId": execution_id }))
            .await
        {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(execution_id, error = %err, "follow-up generation failed");
                return Vec::new();
            }
        };

        let Some(value) = extract_json(&response) else {
            tracing::warn!(execution_id, "follow-up proposal did not parse");
            return Vec::new();
        };

        let proposals = match &value {
            Value::Array(items) => items.clone(),
            Value::Object(map) => map
                .get("steps")
                .or_else(|| map.get("followUpSteps"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        proposals
            .into_iter()
            .filter_map(|item| {
                let description = item.get("description")?.as_str()?.to_string();
                let query_type = item
                    .get("queryType")
                    .and_then(Value::as_str)
                    .unwrap_or("search_content")
                    .to_string();
                let parameters = item
                    .get("parameters")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                // Step numbers are assigned by the orchestrator on splice.
                let mut step = Step::new(0, query_type, description);
                step.parameters = parameters;
                Some(step)
            })
            .take(self.config.max_follow_up_steps)
            .collect()
    }

    /// Tolerant judgement parsing with the fixed fallback
    #[must_use]
    pub fn parse_judgement(text: &str) -> ReasoningJudgement {
        extract_json(text)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_else(ReasoningJudgement::parse_fallback)
    }

    fn build_analysis_prompt(
        &self,
        execution_id: &str,
        step_results: &IndexMap<u32, StepResult>,
        strategy: &Strategy,
    ) -> String {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut cache = EntityCache::new();
        let now = Utc::now();
        for result in step_results.values().filter(|r| r.success) {
            *counts.entry(result.query_type.as_str()).or_insert(0) += 1;
            cache.merge_from_results(&result.results, now);
        }

        let counts_text = counts
            .iter()
            .map(|(query_type, count)| format!("- {query_type}: {count} result set(s)"))
            .collect::<Vec<_>>()
            .join("\n");
        let entities_text = EntityCategory::all()
            .iter()
            .map(|category| format!("- {:?}: {}", category, cache.keys(*category).join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        let context_text = self
            .store
            .build_context_summary(execution_id)
            .unwrap_or_default();
        let conversation = self.store.recent_conversation(execution_id, 5).join("\n");

        format!(
            "You are evaluating whether collected data answers a meeting-preparation query.\n\n\
             Strategy rationale: {}\nExpected outcome: {}\n\n\
             Collected data by query type:\n{}\n\nEntities observed:\n{}\n\n\
             Execution context:\n{}\n\nRecent analysis notes:\n{}\n\n\
             Respond with JSON: {{\"summary\": \"...\", \"completeness\": 0.0, \
             \"insights\": [], \"gaps\": [], \"recommendations\": [], \
             \"needsFollowUp\": false, \"followUpReason\": \"...\"}}",
            strategy.analysis,
            strategy.expected_outcome,
            counts_text,
            entities_text,
            context_text,
            conversation,
        )
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        "- (none)".to_string()
    } else {
        items
            .iter()
            .map(|item| format!("- {item}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use prepflow_context::ContextStoreConfig;
    use serde_json::json;

    /// Backend stub returning a fixed response
    struct TextBackend(String);

    #[async_trait::async_trait]
    impl ReasoningBackend for TextBackend {
        async fn reason(&self, _prompt: &str, _ctx: &Value) -> Result<String, ToolError> {
            Ok(self.0.clone())
        }
    }

    /// Backend stub that always fails
    struct BrokenBackend;

    #[async_trait::async_trait]
    impl ReasoningBackend for BrokenBackend {
        async fn reason(&self, _prompt: &str, _ctx: &Value) -> Result<String, ToolError> {
            Err(ToolError::Reasoning("backend offline".to_string()))
        }
    }

    fn engine_with(backend: Arc<dyn ReasoningBackend>) -> AnalysisEngine {
        let store = Arc::new(ContextStore::new(ContextStoreConfig::default()));
        store.initialize("exec-1", 2, "prep").unwrap();
        AnalysisEngine::new(backend, store, AnalysisConfig::default())
    }

    fn results_with_success() -> IndexMap<u32, StepResult> {
        let mut results = IndexMap::new();
        results.insert(
            1,
            StepResult::success(
                1,
                "find_meetings",
                "find",
                json!([{"id": "m1", "title": "Planning sync"}]),
                json!({}),
                3,
            ),
        );
        results
    }

    #[test]
    fn metrics_on_empty_input_are_all_zero() {
        let metrics = compute_metrics(&IndexMap::new());

        assert_eq!(metrics.confidence, 0.0);
        assert_eq!(metrics.completeness, 0.0);
        assert_eq!(metrics.data_quality, 0.0);
        assert_eq!(metrics.entity_diversity, 0.0);
        assert!(metrics.confidence.is_finite());
    }

    #[test]
    fn metrics_mix_success_and_failure() {
        let mut results = results_with_success();
        results.insert(2, StepResult::failure(2, "get_participants", "who", "boom", 1));

        let metrics = compute_metrics(&results);
        assert_eq!(metrics.data_quality, 0.5);
        // One successful step with data: (0.5 + 1.0) / 2
        assert!((metrics.confidence - 0.75).abs() < 1e-9);
        assert!(metrics.completeness > 0.0 && metrics.completeness < 1.0);
    }

    #[test]
    fn metrics_all_failures_degrade_to_zero_confidence_half() {
        let mut results = IndexMap::new();
        results.insert(1, StepResult::failure(1, "find_meetings", "find", "boom", 1));

        let metrics = compute_metrics(&results);
        assert_eq!(metrics.data_quality, 0.0);
        assert_eq!(metrics.confidence, 0.0);
        assert_eq!(metrics.entity_diversity, 0.0);
    }

    #[test]
    fn low_completeness_triggers_follow_up() {
        let engine = engine_with(Arc::new(BrokenBackend));
        let (needs, reason) =
            engine.evaluate_follow_up_need(0.6, 0.9, &[], Complexity::Low);

        assert!(needs);
        assert!(reason.contains("Low completeness score"));
    }

    #[test]
    fn low_confidence_triggers_follow_up() {
        let engine = engine_with(Arc::new(BrokenBackend));
        let (needs, reason) = engine.evaluate_follow_up_need(0.9, 0.5, &[], Complexity::Low);

        assert!(needs);
        assert!(reason.contains("Low confidence score"));
    }

    #[test]
    fn gaps_trigger_follow_up() {
        let engine = engine_with(Arc::new(BrokenBackend));
        let gaps = vec!["no attendee list".to_string()];
        let (needs, reason) = engine.evaluate_follow_up_need(0.9, 0.9, &gaps, Complexity::Low);

        assert!(needs);
        assert!(reason.contains("no attendee list"));
    }

    #[test]
    fn high_complexity_triggers_follow_up() {
        let engine = engine_with(Arc::new(BrokenBackend));
        let (needs, reason) = engine.evaluate_follow_up_need(0.9, 0.9, &[], Complexity::High);

        assert!(needs);
        assert!(reason.contains("High complexity"));
    }

    #[test]
    fn all_passing_reports_complete() {
        let engine = engine_with(Arc::new(BrokenBackend));
        let (needs, reason) = engine.evaluate_follow_up_need(0.9, 0.9, &[], Complexity::Medium);

        assert!(!needs);
        assert_eq!(reason, "Analysis appears complete");
    }

    #[test]
    fn unparsable_judgement_falls_back() {
        let judgement = AnalysisEngine::parse_judgement("I have no idea.");

        assert_eq!(judgement.summary, "Analysis parsing failed");
        assert_eq!(judgement.completeness, 0.5);
        assert_eq!(judgement.gaps, vec!["Analysis parsing error".to_string()]);
    }

    #[test]
    fn fenced_judgement_parses() {
        let text = "```json\n{\"summary\": \"ok\", \"completeness\": 0.95}\n```";
        let judgement = AnalysisEngine::parse_judgement(text);

        assert_eq!(judgement.summary, "ok");
        assert_eq!(judgement.completeness, 0.95);
    }

    #[tokio::test]
    async fn guard_clause_skips_reasoning() {
        let engine = engine_with(Arc::new(BrokenBackend));
        let strategy = Strategy::from_steps(vec![]);

        let analysis = engine.analyze("exec-1", &IndexMap::new(), &strategy).await;

        assert!(!analysis.needs_follow_up);
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.reason, INSUFFICIENT_RESULTS_REASON);
    }

    #[tokio::test]
    async fn backend_failure_is_safe_no_follow_up() {
        let engine = engine_with(Arc::new(BrokenBackend));
        let strategy = Strategy::from_steps(vec![]);

        let analysis = engine.analyze("exec-1", &results_with_success(), &strategy).await;

        assert!(!analysis.needs_follow_up);
        assert!(analysis.reason.contains("unavailable"));
    }

    #[tokio::test]
    async fn follow_up_generation_respects_cap() {
        let proposals = json!([
            {"description": "a", "queryType": "search_content"},
            {"description": "b", "queryType": "search_content"},
            {"description": "c", "queryType": "search_content"},
            {"description": "d", "queryType": "search_content"},
            {"description": "e", "queryType": "search_content"}
        ]);
        let engine = engine_with(Arc::new(TextBackend(proposals.to_string())));

        let steps = engine.generate_follow_up_steps("exec-1", &[], &[]).await;
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].description, "a");
    }

    #[tokio::test]
    async fn follow_up_generation_tolerates_wrapped_shape() {
        let response = "```json\n{\"steps\": [{\"description\": \"dig deeper\"}]}\n```";
        let engine = engine_with(Arc::new(TextBackend(response.to_string())));

        let steps = engine.generate_follow_up_steps("exec-1", &[], &[]).await;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].query_type, "search_content");
    }

    #[tokio::test]
    async fn follow_up_generation_garbage_yields_empty() {
        let engine = engine_with(Arc::new(TextBackend("no steps for you".to_string())));

        let steps = engine.generate_follow_up_steps("exec-1", &[], &[]).await;
        assert!(steps.is_empty());
    }

    #[tokio::test]
    async fn analyze_full_pass_with_incomplete_judgement() {
        let judgement = json!({
            "summary": "meetings found but attendees missing",
            "completeness": 0.4,
            "gaps": ["attendees"],
            "recommendations": ["fetch participants"]
        });
        // Same backend answers the follow-up generation call; an object
        // without "steps" yields an empty proposal list, which is fine.
        let engine = engine_with(Arc::new(TextBackend(judgement.to_string())));
        let strategy = Strategy::from_steps(vec![]);

        let analysis = engine.analyze("exec-1", &results_with_success(), &strategy).await;

        assert!(analysis.needs_follow_up);
        assert!(analysis.reason.contains("Low completeness score"));
        assert_eq!(analysis.completeness, 0.4);
        assert_eq!(analysis.gaps, vec!["attendees".to_string()]);
    }
}
