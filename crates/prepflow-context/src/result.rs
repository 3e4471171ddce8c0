//! Step result - the unit of data recorded into an execution context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of executing one strategy step
///
/// A failing step is still a `StepResult` (`success == false`); failures
/// are isolated at the step boundary and never surface as errors here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Step number within the strategy
    pub step_number: u32,
    /// Intent identifier the step carried
    pub query_type: String,
    /// Human-readable step description
    pub description: String,
    /// Whether the data access call succeeded
    pub success: bool,
    /// Raw payload returned by the data access tool (null on failure)
    #[serde(default)]
    pub results: Value,
    /// Parameters after dependency/reference resolution
    #[serde(default)]
    pub resolved_parameters: Value,
    /// Wall-clock duration of the data access call
    pub duration_ms: u64,
    /// When the result was produced
    pub timestamp: DateTime<Utc>,
    /// Error message when `success == false`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    /// Create a successful result
    #[must_use]
    pub fn success(
        step_number: u32,
        query_type: impl Into<String>,
        description: impl Into<String>,
        results: Value,
        resolved_parameters: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            step_number,
            query_type: query_type.into(),
            description: description.into(),
            success: true,
            results,
            resolved_parameters,
            duration_ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Create a failed result
    #[must_use]
    pub fn failure(
        step_number: u32,
        query_type: impl Into<String>,
        description: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            step_number,
            query_type: query_type.into(),
            description: description.into(),
            success: false,
            results: Value::Null,
            resolved_parameters: Value::Null,
            duration_ms,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_result_shape() {
        let result = StepResult::success(1, "find_meetings", "find", json!([{"id": "m1"}]), json!({}), 12);
        assert!(result.success);
        assert_eq!(result.step_number, 1);
        assert!(result.error.is_none());
    }

    #[test]
    fn failure_result_shape() {
        let result = StepResult::failure(2, "get_participants", "get", "tool timed out", 7);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("tool timed out"));
        assert!(result.results.is_null());
    }

    #[test]
    fn serializes_camel_case() {
        let result = StepResult::success(1, "find_meetings", "find", Value::Null, Value::Null, 0);
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("stepNumber").is_some());
        assert!(value.get("queryType").is_some());
        assert!(value.get("durationMs").is_some());
    }
}
