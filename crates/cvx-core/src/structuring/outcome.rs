//! Result envelope of the structuring step.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::StructuringError;
use crate::models::record::StructuredRecord;

use super::transport::TokenUsage;

/// Degraded payload attached to a failure once every model gave up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackData {
    /// Empty schema-shaped record.
    pub data: StructuredRecord,
    /// Leading part of the input text.
    pub text_excerpt: String,
}

/// Outcome of one structuring run. Exactly one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Success {
        /// The parsed JSON object, as returned by the model.
        data: Value,
        raw_response: String,
        model_used: String,
        /// Attempts across every model tried.
        attempts: u32,
        token_usage: TokenUsage,
        /// True when `model_used` is not the primary model.
        fallback_used: bool,
        /// Required top-level keys the model left out.
        missing_keys: Vec<String>,
    },
    Failure {
        error: StructuringError,
        /// Last raw model text, when any attempt got one.
        raw_response: Option<String>,
        attempts: u32,
        fallback_data: Option<FallbackData>,
    },
}

impl ParseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ParseOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ParseOutcome::Success { attempts, .. } | ParseOutcome::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn error(&self) -> Option<&StructuringError> {
        match self {
            ParseOutcome::Success { .. } => None,
            ParseOutcome::Failure { error, .. } => Some(error),
        }
    }

    /// Typed view of the successful payload.
    ///
    /// `None` on failure, or when a present key has an incompatible shape.
    pub fn record(&self) -> Option<StructuredRecord> {
        match self {
            ParseOutcome::Success { data, .. } => StructuredRecord::from_value(data),
            ParseOutcome::Failure { .. } => None,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_response: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_used: Option<&'a str>,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_usage: Option<&'a TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_used: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_keys: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_data: Option<&'a FallbackData>,
}

impl Serialize for ParseOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match self {
            ParseOutcome::Success {
                data,
                raw_response,
                model_used,
                attempts,
                token_usage,
                fallback_used,
                missing_keys,
            } => Envelope {
                success: true,
                data: Some(data),
                error: None,
                error_kind: None,
                raw_response: Some(raw_response),
                model_used: Some(model_used),
                attempts: *attempts,
                token_usage: Some(token_usage),
                fallback_used: Some(*fallback_used),
                missing_keys: (!missing_keys.is_empty()).then_some(missing_keys.as_slice()),
                fallback_data: None,
            },
            ParseOutcome::Failure {
                error,
                raw_response,
                attempts,
                fallback_data,
            } => Envelope {
                success: false,
                data: None,
                error: Some(error.to_string()),
                error_kind: Some(error.kind()),
                raw_response: raw_response.as_deref(),
                model_used: None,
                attempts: *attempts,
                token_usage: None,
                fallback_used: None,
                missing_keys: None,
                fallback_data: fallback_data.as_ref(),
            },
        };

        envelope.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let outcome = ParseOutcome::Success {
            data: json!({"nom": "J. DUP"}),
            raw_response: "{\"nom\": \"J. DUP\"}".into(),
            model_used: "gemini-2.0-flash".into(),
            attempts: 1,
            token_usage: TokenUsage { prompt: 10, candidates: 5, total: 15 },
            fallback_used: false,
            missing_keys: vec![],
        };

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "success": true,
                "data": {"nom": "J. DUP"},
                "raw_response": "{\"nom\": \"J. DUP\"}",
                "model_used": "gemini-2.0-flash",
                "attempts": 1,
                "token_usage": {"prompt": 10, "candidates": 5, "total": 15},
                "fallback_used": false
            })
        );
    }

    #[test]
    fn test_missing_keys_are_listed() {
        let outcome = ParseOutcome::Success {
            data: json!({}),
            raw_response: "{}".into(),
            model_used: "gemini-1.5-flash".into(),
            attempts: 4,
            token_usage: TokenUsage::default(),
            fallback_used: true,
            missing_keys: vec!["langues".into()],
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["missing_keys"], json!(["langues"]));
        assert_eq!(value["fallback_used"], json!(true));
    }

    #[test]
    fn test_failure_envelope() {
        let outcome = ParseOutcome::Failure {
            error: StructuringError::ClientHttp { status: 400, body: "bad request".into() },
            raw_response: None,
            attempts: 1,
            fallback_data: None,
        };

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "success": false,
                "error": "LLM endpoint rejected the request (status 400): bad request",
                "error_kind": "client_http_error",
                "attempts": 1
            })
        );
    }

    #[test]
    fn test_fallback_data_has_full_schema() {
        let outcome = ParseOutcome::Failure {
            error: StructuringError::Cancelled,
            raw_response: Some("oops".into()),
            attempts: 2,
            fallback_data: Some(FallbackData {
                data: StructuredRecord::default(),
                text_excerpt: "Jean Dupont".into(),
            }),
        };
        let value = serde_json::to_value(&outcome).unwrap();

        assert_eq!(value["raw_response"], "oops");
        assert_eq!(value["fallback_data"]["text_excerpt"], "Jean Dupont");
        let data = value["fallback_data"]["data"].as_object().unwrap();
        for key in crate::models::record::REQUIRED_KEYS {
            assert!(data.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn test_record_view() {
        let outcome = ParseOutcome::Success {
            data: json!({"nom": "S. CHA", "langues": ["Français – Courant"]}),
            raw_response: String::new(),
            model_used: "m".into(),
            attempts: 1,
            token_usage: TokenUsage::default(),
            fallback_used: false,
            missing_keys: vec![],
        };
        let record = outcome.record().unwrap();
        assert_eq!(record.display_name, "S. CHA");
        assert_eq!(record.languages, vec!["Français – Courant"]);
        assert!(record.experiences.is_empty());
    }
}
