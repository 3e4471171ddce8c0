//! Entity cache and extraction
//!
//! Step result payloads are opaque JSON, but common shapes recur: meetings
//! with ids and titles, participants with emails, documents with ids. The
//! extractor pulls those into four typed categories so later steps and the
//! analysis pass can consume them without re-walking raw payloads.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Topic vocabulary matched against titles/descriptions/summaries
const TOPIC_KEYWORDS: &[&str] = &[
    "budget",
    "roadmap",
    "planning",
    "review",
    "hiring",
    "launch",
    "design",
    "security",
    "marketing",
    "sales",
    "strategy",
    "sync",
    "retrospective",
    "onboarding",
];

static TOPIC_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternation = TOPIC_KEYWORDS.join("|");
    Regex::new(&format!(r"(?i)\b({alternation})\b")).expect("valid pattern")
});

/// Entity category within the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    /// People, keyed by email
    People,
    /// Meetings, keyed by id
    Meetings,
    /// Documents, keyed by id
    Documents,
    /// Topics, a set of keywords
    Topics,
}

impl EntityCategory {
    /// All categories, in cache order
    #[must_use]
    pub const fn all() -> [EntityCategory; 4] {
        [Self::People, Self::Meetings, Self::Documents, Self::Topics]
    }
}

/// A cached entity with its last-seen timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntity {
    /// Raw entity payload as it appeared in a step result
    pub value: Value,
    /// When this entity was last observed
    pub last_seen: DateTime<Utc>,
}

/// Entities extracted from one result payload
#[derive(Debug, Clone, Default)]
pub struct ExtractedEntities {
    /// People keyed by lowercased email
    pub people: Vec<(String, Value)>,
    /// Meetings keyed by id
    pub meetings: Vec<(String, Value)>,
    /// Documents keyed by id
    pub documents: Vec<(String, Value)>,
    /// Topic keywords observed
    pub topics: Vec<String>,
}

impl ExtractedEntities {
    /// True when nothing was extracted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
            && self.meetings.is_empty()
            && self.documents.is_empty()
            && self.topics.is_empty()
    }
}

/// Per-execution entity memo
///
/// Merges are last-write-wins per key, stamped with the observing result's
/// timestamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityCache {
    people: HashMap<String, CachedEntity>,
    meetings: HashMap<String, CachedEntity>,
    documents: HashMap<String, CachedEntity>,
    topics: HashMap<String, DateTime<Utc>>,
}

impl EntityCache {
    /// Create an empty cache
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge everything extractable from a result payload
    pub fn merge_from_results(&mut self, results: &Value, seen: DateTime<Utc>) {
        let extracted = extract_entities(results);
        for (email, value) in extracted.people {
            self.people.insert(email, CachedEntity { value, last_seen: seen });
        }
        for (id, value) in extracted.meetings {
            self.meetings.insert(id, CachedEntity { value, last_seen: seen });
        }
        for (id, value) in extracted.documents {
            self.documents.insert(id, CachedEntity { value, last_seen: seen });
        }
        for topic in extracted.topics {
            self.topics.insert(topic, seen);
        }
    }

    /// Entities in one category, as raw values
    #[must_use]
    pub fn entities(&self, category: EntityCategory) -> Vec<Value> {
        match category {
            EntityCategory::People => self.people.values().map(|e| e.value.clone()).collect(),
            EntityCategory::Meetings => self.meetings.values().map(|e| e.value.clone()).collect(),
            EntityCategory::Documents => self.documents.values().map(|e| e.value.clone()).collect(),
            EntityCategory::Topics => self.topics.keys().map(|t| Value::String(t.clone())).collect(),
        }
    }

    /// Keys present in one category (emails, ids, or topic words)
    #[must_use]
    pub fn keys(&self, category: EntityCategory) -> Vec<String> {
        let mut keys: Vec<String> = match category {
            EntityCategory::People => self.people.keys().cloned().collect(),
            EntityCategory::Meetings => self.meetings.keys().cloned().collect(),
            EntityCategory::Documents => self.documents.keys().cloned().collect(),
            EntityCategory::Topics => self.topics.keys().cloned().collect(),
        };
        keys.sort();
        keys
    }

    /// Count of entries in one category
    #[inline]
    #[must_use]
    pub fn count(&self, category: EntityCategory) -> usize {
        match category {
            EntityCategory::People => self.people.len(),
            EntityCategory::Meetings => self.meetings.len(),
            EntityCategory::Documents => self.documents.len(),
            EntityCategory::Topics => self.topics.len(),
        }
    }

    /// Fraction of the four categories with at least one entry
    #[must_use]
    pub fn diversity(&self) -> f64 {
        let populated = EntityCategory::all()
            .iter()
            .filter(|c| self.count(**c) > 0)
            .count();
        populated as f64 / EntityCategory::all().len() as f64
    }
}

/// Extract typed entities from an opaque result payload
///
/// Tolerant by design: unknown shapes contribute nothing rather than
/// failing. Scans top-level arrays and the conventional collection keys
/// (`results`, `meetings`, `participants`, `people`, `documents`, `items`).
#[must_use]
pub fn extract_entities(results: &Value) -> ExtractedEntities {
    let mut extracted = ExtractedEntities::default();
    for item in candidate_items(results) {
        classify_item(item, &mut extracted);
    }
    extracted
}

/// Collect one string field from every candidate item of a payload
///
/// Used for the common id/email projections (`meeting_ids`,
/// `participant_emails`) where the query type already fixes what the items
/// are.
#[must_use]
pub fn collect_field(results: &Value, key: &str) -> Vec<String> {
    candidate_items(results)
        .into_iter()
        .filter_map(|item| item.as_object().and_then(|map| string_field(map, key)))
        .collect()
}

fn candidate_items(results: &Value) -> Vec<&Value> {
    match results {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            let mut items = Vec::new();
            for key in ["results", "meetings", "participants", "people", "documents", "items"] {
                if let Some(Value::Array(arr)) = map.get(key) {
                    items.extend(arr.iter());
                }
            }
            if items.is_empty() {
                vec![results]
            } else {
                items
            }
        }
        _ => Vec::new(),
    }
}

fn classify_item(item: &Value, out: &mut ExtractedEntities) {
    let Some(map) = item.as_object() else { return };

    if let Some(email) = string_field(map, "email") {
        out.people.push((email.to_lowercase(), item.clone()));
    }
    // People also appear nested under organizer/attendees/participants.
    if let Some(organizer) = map.get("organizer") {
        if let Some(email) = organizer.as_object().and_then(|o| string_field(o, "email")) {
            out.people.push((email.to_lowercase(), organizer.clone()));
        }
    }
    for key in ["attendees", "participants"] {
        if let Some(Value::Array(nested)) = map.get(key) {
            for person in nested {
                if let Some(email) = person.as_object().and_then(|p| string_field(p, "email")) {
                    out.people.push((email.to_lowercase(), person.clone()));
                }
            }
        }
    }

    if let Some(id) = string_field(map, "id") {
        if has_any_key(map, &["title", "subject", "start", "startTime", "attendees", "organizer"]) {
            out.meetings.push((id, item.clone()));
        } else if has_any_key(map, &["name", "mimeType", "url", "webViewLink"]) {
            out.documents.push((id, item.clone()));
        }
    }

    for key in ["title", "subject", "description", "summary", "name"] {
        if let Some(text) = string_field(map, key) {
            for capture in TOPIC_PATTERN.find_iter(&text) {
                out.topics.push(capture.as_str().to_lowercase());
            }
        }
    }
}

fn string_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn has_any_key(map: &serde_json::Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().any(|k| map.contains_key(*k))
}
