//! Per-execution context
//!
//! One `ExecutionContext` exists per execution id. It accumulates step
//! results into the entity cache and the intermediate-data map, and keeps a
//! bounded conversation history for prompt construction.

use crate::entity::{collect_field, EntityCache};
use crate::result::StepResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};

/// Conversation history cap per execution
pub const CONVERSATION_CAP: usize = 10;

/// One conversation exchange retained for later prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Who produced the entry ("analysis", "user", ...)
    pub role: String,
    /// Entry text
    pub content: String,
    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,
}

/// Execution-level bookkeeping carried by the context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Steps in the strategy when the execution opened
    pub total_steps: usize,
    /// Steps recorded so far (success or failure)
    pub completed_steps: usize,
    /// The original user query, for prompt context
    pub original_query: String,
}

/// State accumulated over one strategy execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Typed entity memo
    pub entity_cache: EntityCache,
    /// `step_<n>` payloads plus well-known aliases
    pub intermediate: HashMap<String, Value>,
    /// Ring buffer of recent exchanges, capped at [`CONVERSATION_CAP`]
    pub conversation: VecDeque<ConversationEntry>,
    /// Bookkeeping
    pub metadata: ContextMetadata,
    /// When the execution opened
    pub started_at: DateTime<Utc>,
    /// Stamped on finalize
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    /// Open a fresh context
    #[must_use]
    pub fn new(total_steps: usize, original_query: impl Into<String>) -> Self {
        Self {
            entity_cache: EntityCache::new(),
            intermediate: HashMap::new(),
            conversation: VecDeque::new(),
            metadata: ContextMetadata {
                total_steps,
                completed_steps: 0,
                original_query: original_query.into(),
            },
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Record one step result
    ///
    /// Successful results feed the entity cache and (re)write the
    /// convenience aliases; failures only bump the completed count.
    pub fn record(&mut self, result: &StepResult) {
        self.metadata.completed_steps += 1;
        if !result.success {
            return;
        }

        self.entity_cache.merge_from_results(&result.results, result.timestamp);
        self.intermediate
            .insert(format!("step_{}", result.step_number), result.results.clone());
        self.write_aliases(result);
    }

    // Aliases are rewritten on every matching result so "latest_*" always
    // reflects the most recent step of that type.
    fn write_aliases(&mut self, result: &StepResult) {
        match result.query_type.as_str() {
            "find_meetings" | "get_meetings" => {
                self.intermediate
                    .insert("latest_meetings".to_string(), result.results.clone());
                self.intermediate
                    .insert("meeting_ids".to_string(), json!(collect_field(&result.results, "id")));
            }
            "get_participants" | "find_participants" => {
                self.intermediate
                    .insert("latest_participants".to_string(), result.results.clone());
                self.intermediate.insert(
                    "participant_emails".to_string(),
                    json!(collect_field(&result.results, "email")),
                );
            }
            "find_documents" | "get_documents" => {
                self.intermediate
                    .insert("latest_documents".to_string(), result.results.clone());
                self.intermediate
                    .insert("document_ids".to_string(), json!(collect_field(&result.results, "id")));
            }
            _ => {}
        }
    }

    /// Append a conversation entry, evicting the oldest past the cap
    pub fn push_conversation(&mut self, role: impl Into<String>, content: impl Into<String>) {
        if self.conversation.len() >= CONVERSATION_CAP {
            self.conversation.pop_front();
        }
        self.conversation.push_back(ConversationEntry {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    /// The most recent conversation entries, oldest first
    #[must_use]
    pub fn recent_conversation(&self, limit: usize) -> Vec<&ConversationEntry> {
        let skip = self.conversation.len().saturating_sub(limit);
        self.conversation.iter().skip(skip).collect()
    }

    /// Compact text summary of what the execution has gathered so far
    #[must_use]
    pub fn summary(&self) -> String {
        use crate::entity::EntityCategory;

        let mut lines = vec![format!(
            "Progress: {}/{} steps recorded",
            self.metadata.completed_steps, self.metadata.total_steps
        )];
        if !self.metadata.original_query.is_empty() {
            lines.push(format!("Query: {}", self.metadata.original_query));
        }
        for category in EntityCategory::all() {
            let keys = self.entity_cache.keys(category);
            if !keys.is_empty() {
                lines.push(format!("{:?}: {}", category, keys.join(", ")));
            }
        }
        lines.join("\n")
    }

    /// Stamp the end time; idempotent
    pub fn finalize(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }

    /// Age of the context relative to its end (or start, when still open)
    #[must_use]
    pub fn age_reference(&self) -> DateTime<Utc> {
        self.ended_at.unwrap_or(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn meeting_result() -> StepResult {
        StepResult::success(
            1,
            "find_meetings",
            "find recent meetings",
            json!([{"id": "m1", "title": "Planning sync"}, {"id": "m2", "title": "1:1"}]),
            json!({}),
            5,
        )
    }

    #[test]
    fn record_writes_step_entry_and_aliases() {
        let mut ctx = ExecutionContext::new(2, "prep for monday");
        ctx.record(&meeting_result());

        assert_eq!(ctx.metadata.completed_steps, 1);
        assert!(ctx.intermediate.contains_key("step_1"));
        assert_eq!(ctx.intermediate["meeting_ids"], json!(["m1", "m2"]));
        assert!(ctx.intermediate.contains_key("latest_meetings"));
    }

    #[test]
    fn participant_aliases() {
        let mut ctx = ExecutionContext::new(1, "");
        let result = StepResult::success(
            2,
            "get_participants",
            "who attends",
            json!([{"email": "a@x.com"}, {"email": "b@x.com"}]),
            json!({}),
            3,
        );
        ctx.record(&result);

        assert_eq!(ctx.intermediate["participant_emails"], json!(["a@x.com", "b@x.com"]));
    }

    #[test]
    fn failed_result_only_bumps_count() {
        let mut ctx = ExecutionContext::new(1, "");
        ctx.record(&StepResult::failure(1, "find_meetings", "find", "boom", 1));

        assert_eq!(ctx.metadata.completed_steps, 1);
        assert!(ctx.intermediate.is_empty());
    }

    #[test]
    fn conversation_is_ring_capped() {
        let mut ctx = ExecutionContext::new(0, "");
        for i in 0..15 {
            ctx.push_conversation("analysis", format!("entry {i}"));
        }

        assert_eq!(ctx.conversation.len(), CONVERSATION_CAP);
        assert_eq!(ctx.conversation.front().unwrap().content, "entry 5");
        assert_eq!(ctx.conversation.back().unwrap().content, "entry 14");
    }

    #[test]
    fn recent_conversation_returns_tail() {
        let mut ctx = ExecutionContext::new(0, "");
        for i in 0..4 {
            ctx.push_conversation("analysis", format!("entry {i}"));
        }

        let recent = ctx.recent_conversation(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "entry 2");
    }

    #[test]
    fn summary_mentions_progress_and_entities() {
        let mut ctx = ExecutionContext::new(2, "prep");
        ctx.record(&meeting_result());

        let summary = ctx.summary();
        assert!(summary.contains("1/2 steps"));
        assert!(summary.contains("m1"));
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut ctx = ExecutionContext::new(0, "");
        ctx.finalize();
        let first = ctx.ended_at;
        ctx.finalize();
        assert_eq!(first, ctx.ended_at);
    }
}
