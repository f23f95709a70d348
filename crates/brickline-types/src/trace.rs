//! Execution-trace records from the most recent pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error name marking a brick input that failed schema validation.
pub const INPUT_VALIDATION_ERROR: &str = "InputValidationError";

/// One schema-validation failure inside an input validation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSubError {
    /// JSON pointer into the brick input, e.g. `#/headers/Authorization`.
    pub instance_location: String,
    pub error: String,
}

/// Serialized error captured by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceError {
    #[serde(default)]
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationSubError>,
}

impl TraceError {
    pub fn is_input_validation(&self) -> bool {
        self.name == INPUT_VALIDATION_ERROR
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub instance_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TraceError>,
}

impl TraceRecord {
    pub fn success(instance_id: Uuid) -> Self {
        Self {
            instance_id,
            timestamp: None,
            error: None,
        }
    }

    pub fn failure(instance_id: Uuid, error: TraceError) -> Self {
        Self {
            instance_id,
            timestamp: None,
            error: Some(error),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Split a JSON pointer (`#/a/b~1c`) into unescaped tokens (`["a", "b/c"]`).
pub fn pointer_tokens(pointer: &str) -> Vec<String> {
    let pointer = pointer.strip_prefix('#').unwrap_or(pointer);
    pointer
        .split('/')
        .filter(|token| !token.is_empty())
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pointer_tokens_unescape() {
        assert_eq!(pointer_tokens("#/url"), vec!["url"]);
        assert_eq!(
            pointer_tokens("#/headers/a~1b/c~0d"),
            vec!["headers", "a/b", "c~d"]
        );
        assert!(pointer_tokens("#").is_empty());
        assert!(pointer_tokens("").is_empty());
    }

    #[test]
    fn record_deserializes() {
        let record: TraceRecord = serde_json::from_value(json!({
            "instanceId": "6f1c3a34-2a65-4a0b-9a43-3c4b0c7c2f51",
            "timestamp": "2026-01-02T03:04:05Z",
            "error": {
                "name": "InputValidationError",
                "message": "Invalid inputs for brick",
                "errors": [{"instanceLocation": "#/url", "error": "must be a string"}]
            }
        }))
        .unwrap();
        let error = record.error.unwrap();
        assert!(error.is_input_validation());
        assert_eq!(error.errors[0].instance_location, "#/url");
        assert!(record.timestamp.is_some());
    }
}
