//! Capability gateway port.
//!
//! One structured inference call: a worker role, its instructions, an input
//! text and an optional response schema go in, raw completion text comes
//! out. [`decode_structured`] is the single place where completion text is
//! turned into a typed value.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};
use crate::roles::RoleId;

/// Expected shape of a structured role output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSchema {
    /// Type name, used in logs and validation errors.
    pub name: String,
    /// JSON shape appended to the role's system instructions.
    pub hint: String,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hint: hint.into(),
        }
    }
}

/// A fully resolved call to one worker role.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRequest {
    pub role: RoleId,
    /// Agent id used for traces and error counters.
    pub agent_id: String,
    pub pipe: String,
    pub instructions: String,
    pub input: String,
    pub schema: Option<ResponseSchema>,
}

impl RoleRequest {
    /// System prompt sent to the model: instructions plus the schema hint.
    pub fn system_prompt(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}\n\nRespond with valid JSON only, matching this structure:\n{}",
                self.instructions, schema.hint
            ),
            None => self.instructions.clone(),
        }
    }
}

/// Executes structured inference calls.
///
/// Implementations must be safe to call concurrently and perform a single
/// attempt per call; retries belong to the error handler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapabilityGateway: Send + Sync {
    /// Run one role call and return the raw completion text.
    async fn invoke(&self, request: &RoleRequest) -> GatewayResult<String>;
}

/// Decode a completion into `T`.
///
/// Any extraction or deserialization failure is a validation error.
pub fn decode_structured<T: DeserializeOwned>(completion: &str) -> GatewayResult<T> {
    let json = extract_json_from_completion(completion)
        .map_err(|message| GatewayError::Validation { message })?;

    serde_json::from_str(json).map_err(|e| {
        warn!(
            error = %e,
            preview = %json.chars().take(200).collect::<String>(),
            "Completion did not match expected structure"
        );
        GatewayError::Validation {
            message: format!("{} (expected {})", e, std::any::type_name::<T>()),
        }
    })
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Tries raw JSON first, then a ```json fenced block, then any fenced block.
pub fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// Serialize a value for trace/export payloads without failing the caller.
pub(crate) fn serialize_for_log<T: Serialize>(value: &T, context: &str) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for export"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BiasCheck, ResponseAnalysis};

    #[test]
    fn test_extract_raw_json() {
        assert_eq!(
            extract_json_from_completion("  {\"a\": 1}  ").unwrap(),
            "{\"a\": 1}"
        );
        assert_eq!(extract_json_from_completion("[1, 2]").unwrap(), "[1, 2]");
    }

    #[test]
    fn test_extract_fenced_json() {
        let completion = "Here you go:\n```json\n{\"has_bias\": false}\n```\nThanks";
        assert_eq!(
            extract_json_from_completion(completion).unwrap(),
            "{\"has_bias\": false}"
        );

        let completion = "```\n{\"x\": true}\n```";
        assert_eq!(extract_json_from_completion(completion).unwrap(), "{\"x\": true}");
    }

    #[test]
    fn test_extract_rejects_prose() {
        let err = extract_json_from_completion("I think it is great").unwrap_err();
        assert!(err.contains("No JSON found"));
        assert!(extract_json_from_completion("```json\n```").is_err());
    }

    #[test]
    fn test_decode_structured_success() {
        let analysis: ResponseAnalysis = decode_structured(
            r#"```json
{"themes": ["pricing"], "sentiment": 0.5, "hypotheses_hit": ["h1"], "key_quotes": [], "confidence": 0.8}
```"#,
        )
        .unwrap();
        assert_eq!(analysis.themes, vec!["pricing"]);
        assert_eq!(analysis.hypotheses_hit, vec!["h1"]);
    }

    #[test]
    fn test_decode_structured_mismatch_is_validation_error() {
        let err = decode_structured::<ResponseAnalysis>(r#"{"themes": "not a list"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));

        let err = decode_structured::<BiasCheck>("no json here").unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[test]
    fn test_system_prompt_appends_schema_hint() {
        let mut request = RoleRequest {
            role: RoleId::BiasModerator,
            agent_id: "bias_moderator".to_string(),
            pipe: "vb-bias-moderator-v1".to_string(),
            instructions: "Check the question.".to_string(),
            input: "Q".to_string(),
            schema: Some(ResponseSchema::new("BiasCheck", "{\"has_bias\": bool}")),
        };
        let prompt = request.system_prompt();
        assert!(prompt.starts_with("Check the question."));
        assert!(prompt.contains("{\"has_bias\": bool}"));

        request.schema = None;
        assert_eq!(request.system_prompt(), "Check the question.");
    }

    #[test]
    fn test_serialize_for_log() {
        let value = serialize_for_log(&vec!["a", "b"], "test");
        assert_eq!(value, serde_json::json!(["a", "b"]));
    }
}
