//! Context store
//!
//! Registry of per-execution contexts keyed by execution id. Eviction is
//! opportunistic: every `initialize` first drops contexts past the age
//! limit, then drops oldest-first beyond the count limit. No background
//! timer.

use crate::context::ExecutionContext;
use crate::entity::EntityCategory;
use crate::error::ContextError;
use crate::result::StepResult;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context store limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStoreConfig {
    /// Maximum retained contexts before oldest-first eviction
    pub max_contexts: usize,
    /// Maximum context age in seconds (default one hour)
    pub max_age_secs: u64,
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            max_contexts: 100,
            max_age_secs: 3600,
        }
    }
}

impl ContextStoreConfig {
    /// Create default limits
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With maximum retained contexts
    #[inline]
    #[must_use]
    pub fn with_max_contexts(mut self, max: usize) -> Self {
        self.max_contexts = max;
        self
    }

    /// With maximum age in seconds
    #[inline]
    #[must_use]
    pub fn with_max_age_secs(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }
}

/// Registry of execution contexts
#[derive(Debug, Default)]
pub struct ContextStore {
    config: ContextStoreConfig,
    contexts: DashMap<String, ExecutionContext>,
}

impl ContextStore {
    /// Create a store with the given limits
    #[inline]
    #[must_use]
    pub fn new(config: ContextStoreConfig) -> Self {
        Self {
            config,
            contexts: DashMap::new(),
        }
    }

    /// Open a context for a new execution
    ///
    /// Runs opportunistic eviction first.
    ///
    /// # Errors
    /// `ContextError::AlreadyInitialized` when the id is already tracked.
    pub fn initialize(
        &self,
        execution_id: &str,
        total_steps: usize,
        original_query: &str,
    ) -> Result<(), ContextError> {
        self.evict();

        if self.contexts.contains_key(execution_id) {
            return Err(ContextError::AlreadyInitialized(execution_id.to_string()));
        }
        self.contexts.insert(
            execution_id.to_string(),
            ExecutionContext::new(total_steps, original_query),
        );
        tracing::debug!(execution_id, total_steps, "context initialized");
        Ok(())
    }

    /// Record one step result into an execution's context
    ///
    /// # Errors
    /// `ContextError::UnknownExecution` when the id is not tracked;
    /// `ContextError::AlreadyFinalized` when the context is closed.
    pub fn record_step_result(
        &self,
        execution_id: &str,
        result: &StepResult,
    ) -> Result<(), ContextError> {
        let mut ctx = self
            .contexts
            .get_mut(execution_id)
            .ok_or_else(|| ContextError::UnknownExecution(execution_id.to_string()))?;
        if ctx.ended_at.is_some() {
            return Err(ContextError::AlreadyFinalized(execution_id.to_string()));
        }
        ctx.record(result);
        Ok(())
    }

    /// Raw payload recorded for one step (`step_<n>` entry)
    #[must_use]
    pub fn step_result(&self, execution_id: &str, step_number: u32) -> Option<Value> {
        self.intermediate_data(execution_id, &format!("step_{step_number}"))
    }

    /// One intermediate-data entry (step payloads or aliases)
    #[must_use]
    pub fn intermediate_data(&self, execution_id: &str, key: &str) -> Option<Value> {
        self.contexts
            .get(execution_id)
            .and_then(|ctx| ctx.intermediate.get(key).cloned())
    }

    /// All intermediate data for an execution
    #[must_use]
    pub fn intermediate_snapshot(&self, execution_id: &str) -> Option<Value> {
        self.contexts.get(execution_id).map(|ctx| {
            Value::Object(
                ctx.intermediate
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        })
    }

    /// Cached entities in one category
    #[must_use]
    pub fn cached_entities(&self, execution_id: &str, category: EntityCategory) -> Vec<Value> {
        self.contexts
            .get(execution_id)
            .map(|ctx| ctx.entity_cache.entities(category))
            .unwrap_or_default()
    }

    /// Append a conversation entry
    ///
    /// # Errors
    /// `ContextError::UnknownExecution` when the id is not tracked;
    /// `ContextError::AlreadyFinalized` when the context is closed.
    pub fn push_conversation(
        &self,
        execution_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), ContextError> {
        let mut ctx = self
            .contexts
            .get_mut(execution_id)
            .ok_or_else(|| ContextError::UnknownExecution(execution_id.to_string()))?;
        if ctx.ended_at.is_some() {
            return Err(ContextError::AlreadyFinalized(execution_id.to_string()));
        }
        ctx.push_conversation(role, content);
        Ok(())
    }

    /// Most recent conversation entries, oldest first
    #[must_use]
    pub fn recent_conversation(&self, execution_id: &str, limit: usize) -> Vec<String> {
        self.contexts
            .get(execution_id)
            .map(|ctx| {
                ctx.recent_conversation(limit)
                    .into_iter()
                    .map(|entry| format!("{}: {}", entry.role, entry.content))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Compact text summary for prompt construction
    #[must_use]
    pub fn build_context_summary(&self, execution_id: &str) -> Option<String> {
        self.contexts.get(execution_id).map(|ctx| ctx.summary())
    }

    /// Stamp an execution's context as finished
    pub fn finalize(&self, execution_id: &str) {
        if let Some(mut ctx) = self.contexts.get_mut(execution_id) {
            ctx.finalize();
        }
    }

    /// Drop one context outright
    pub fn remove(&self, execution_id: &str) -> bool {
        self.contexts.remove(execution_id).is_some()
    }

    /// Number of tracked contexts
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True when no contexts are tracked
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    // Age limit first, then oldest-first (by end-or-start time) down to the
    // count limit. Terminal state of the owning execution is irrelevant.
    fn evict(&self) {
        let now = Utc::now();
        let max_age = Duration::seconds(self.config.max_age_secs as i64);

        let expired: Vec<String> = self
            .contexts
            .iter()
            .filter(|entry| now - entry.value().age_reference() > max_age)
            .map(|entry| entry.key().clone())
            .collect();
        for key in &expired {
            self.contexts.remove(key);
            tracing::debug!(execution_id = %key, "context evicted by age");
        }

        if self.contexts.len() > self.config.max_contexts {
            let mut by_age: Vec<(String, chrono::DateTime<Utc>)> = self
                .contexts
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().age_reference()))
                .collect();
            by_age.sort_by_key(|(_, at)| *at);

            let excess = self.contexts.len() - self.config.max_contexts;
            for (key, _) in by_age.into_iter().take(excess) {
                self.contexts.remove(&key);
                tracing::debug!(execution_id = %key, "context evicted by count");
            }
        }
    }
}
