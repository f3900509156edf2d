//! LLM transport abstraction.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StructuringError;
use crate::models::config::StructuringConfig;

/// One generation request: prompt plus sampling and safety parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    pub stop_sequences: Vec<String>,
    /// Block threshold applied to every harm category.
    pub safety_threshold: String,
}

impl GenerationRequest {
    /// Build a request carrying the configured generation parameters.
    pub fn new(prompt: String, config: &StructuringConfig) -> Self {
        Self {
            prompt,
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
            stop_sequences: config.stop_sequences.clone(),
            safety_threshold: config.safety_threshold.clone(),
        }
    }
}

/// Token counters reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub candidates: u32,
    pub total: u32,
}

/// What the endpoint produced for a request that completed.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResponse {
    /// Generated text (possibly empty) and its token usage.
    Text { text: String, usage: TokenUsage },
    /// The safety filter suppressed generation.
    Blocked { reason: String },
}

/// Transport-level failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A 2xx answer whose body is not the expected response document.
    #[error("unreadable response body: {0}")]
    InvalidBody(String),
}

impl TransportError {
    /// Map to the structuring failure cause for an attempt with `timeout`.
    pub fn into_structuring(self, timeout: Duration) -> StructuringError {
        match self {
            TransportError::Timeout => StructuringError::Timeout { timeout },
            TransportError::Connection(message) => StructuringError::Connection(message),
            TransportError::Http { status: 429, body } => StructuringError::RateLimited { body },
            TransportError::Http { status, body } if (500..600).contains(&status) => {
                StructuringError::Server { status, body }
            }
            TransportError::Http { status, body } => StructuringError::ClientHttp { status, body },
            TransportError::InvalidBody(reason) => StructuringError::MalformedOutput { reason },
        }
    }
}

/// A generative model endpoint.
///
/// Implementations must honor `timeout` as the deadline of the whole request.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<GenerationResponse, TransportError>;
}
