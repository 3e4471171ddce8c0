//! Step parameter resolution
//!
//! Resolution order: literal parameters, then per-dependency projections
//! looked up in an extractor table keyed by the dependency's query type,
//! then `stepN_results` reference markers, then caller identity.
//!
//! The extractor table replaces string-keyed dynamic dispatch: each known
//! query type maps to a projection function, with one fallback entry for
//! unrecognized types.

use crate::types::{RequestContext, Step};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use prepflow_context::entity::collect_field;
use prepflow_context::StepResult;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

static STEP_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^step(\d+)_results$").expect("valid pattern"));

type Extractor = fn(&Value) -> Vec<(&'static str, Value)>;

fn meetings_extractor(results: &Value) -> Vec<(&'static str, Value)> {
    vec![
        ("meetingIds", json!(collect_field(results, "id"))),
        ("meetings", results.clone()),
    ]
}

fn participants_extractor(results: &Value) -> Vec<(&'static str, Value)> {
    vec![
        ("participantEmails", json!(collect_field(results, "email"))),
        ("participants", results.clone()),
    ]
}

fn documents_extractor(results: &Value) -> Vec<(&'static str, Value)> {
    vec![
        ("documentIds", json!(collect_field(results, "id"))),
        ("documents", results.clone()),
    ]
}

fn fallback_extractor(results: &Value) -> Vec<(&'static str, Value)> {
    vec![
        ("previousResults", results.clone()),
        ("previousData", results.clone()),
    ]
}

static EXTRACTORS: Lazy<HashMap<&'static str, Extractor>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, Extractor> = HashMap::new();
    table.insert("find_meetings", meetings_extractor as Extractor);
    table.insert("get_meetings", meetings_extractor as Extractor);
    table.insert("get_participants", participants_extractor as Extractor);
    table.insert("find_participants", participants_extractor as Extractor);
    table.insert("find_documents", documents_extractor as Extractor);
    table.insert("get_documents", documents_extractor as Extractor);
    table
});

/// Resolve a step's parameters against prior results and caller context
#[must_use]
pub fn resolve_parameters(
    step: &Step,
    prior: &IndexMap<u32, StepResult>,
    request: &RequestContext,
) -> Map<String, Value> {
    let mut resolved = step.parameters.clone();

    // Dependency projections, in declaration order.
    for dep in &step.dependencies {
        let Some(result) = prior.get(dep) else {
            tracing::warn!(step = step.step_number, dependency = dep, "dependency result missing");
            continue;
        };
        if !result.success {
            continue;
        }
        let extractor = EXTRACTORS
            .get(result.query_type.as_str())
            .copied()
            .unwrap_or(fallback_extractor);
        for (key, value) in extractor(&result.results) {
            resolved.insert(key.to_string(), value);
        }
    }

    // Literal `stepN_results` markers resolve to that step's raw payload.
    for value in resolved.values_mut() {
        let Some(reference) = value.as_str() else { continue };
        let Some(captures) = STEP_REFERENCE.captures(reference) else { continue };
        if let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
            if let Some(result) = prior.get(&number) {
                *value = result.results.clone();
            }
        }
    }

    // Caller identity last; explicit parameters win.
    if let Some(email) = &request.user_email {
        resolved
            .entry("userEmail".to_string())
            .or_insert_with(|| Value::String(email.clone()));
    }

    resolved
}
