//! Gemini `generateContent` transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::models::config::StructuringConfig;

use super::transport::{
    GenerationRequest, GenerationResponse, LlmTransport, TokenUsage, TransportError,
};

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Finish reasons meaning the answer was withheld by a filter.
const BLOCKING_FINISH_REASONS: [&str; 4] = ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
    safety_settings: Vec<SafetySetting<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct SafetySetting<'a> {
    category: &'static str,
    threshold: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UsageMetadata {
    prompt_token_count: u32,
    candidates_token_count: u32,
    total_token_count: u32,
}

impl<'a> GenerateContentRequest<'a> {
    fn from_request(request: &'a GenerationRequest) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                top_k: request.top_k,
                top_p: request.top_p,
                max_output_tokens: request.max_output_tokens,
                stop_sequences: request.stop_sequences.iter().map(String::as_str).collect(),
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: &request.safety_threshold,
                })
                .collect(),
        }
    }
}

impl GenerateContentResponse {
    /// Reduce the wire response to text or a block indication.
    fn interpret(self) -> GenerationResponse {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return GenerationResponse::Blocked { reason };
        }

        let usage = self
            .usage_metadata
            .map(|u| TokenUsage {
                prompt: u.prompt_token_count,
                candidates: u.candidates_token_count,
                total: u.total_token_count,
            })
            .unwrap_or_default();

        let Some(candidate) = self.candidates.into_iter().next() else {
            return GenerationResponse::Text {
                text: String::new(),
                usage,
            };
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        match candidate.finish_reason {
            Some(reason)
                if text.trim().is_empty()
                    && BLOCKING_FINISH_REASONS.contains(&reason.as_str()) =>
            {
                GenerationResponse::Blocked { reason }
            }
            _ => GenerationResponse::Text { text, usage },
        }
    }
}

/// Transport for the Gemini generative language API.
#[derive(Clone)]
pub struct GeminiTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .user_agent(concat!("cvx/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "structuring.api_base_url",
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build a transport from configuration, reading the key from the environment.
    pub fn from_config(config: &StructuringConfig) -> Result<Self, ConfigError> {
        Self::new(&config.api_base_url, config.api_key()?)
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl LlmTransport for GeminiTransport {
    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<GenerationResponse, TransportError> {
        let body = GenerateContentRequest::from_request(request);

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{} returned {}: {}", model, status, body);
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(classify)?;

        if let Some(usage) = &parsed.usage_metadata {
            debug!(
                "{} usage: prompt={}, candidates={}, total={}",
                model,
                usage.prompt_token_count,
                usage.candidates_token_count,
                usage.total_token_count
            );
        }

        Ok(parsed.interpret())
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_decode() {
        TransportError::InvalidBody(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}
