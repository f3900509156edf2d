//! Model answer to JSON object.

use serde_json::Value;

use crate::error::StructuringError;

/// Substring from the first `{` to the last `}`, inclusive.
///
/// Leading or trailing commentary and markdown fences fall outside the slice.
pub fn extract_json_candidate(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse a model answer into a JSON object.
pub fn parse_model_output(text: &str) -> Result<Value, StructuringError> {
    let candidate = extract_json_candidate(text).ok_or_else(|| StructuringError::MalformedOutput {
        reason: "no JSON object found in model output".to_string(),
    })?;

    let value: Value =
        serde_json::from_str(candidate).map_err(|e| StructuringError::MalformedOutput {
            reason: format!("invalid JSON: {}", e),
        })?;

    if !value.is_object() {
        return Err(StructuringError::MalformedOutput {
            reason: "model output is not a JSON object".to_string(),
        });
    }

    Ok(value)
}
