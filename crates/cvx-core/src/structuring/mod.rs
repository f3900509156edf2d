//! LLM structuring: document text to a structured résumé record.
//!
//! The client drives a per-model attempt loop (progressive timeouts, linear
//! backoff) and falls back across the configured models. Every run ends in a
//! [`ParseOutcome`]; nothing below this module raises past it.

mod client;
mod gemini;
mod outcome;
mod prompt;
mod response;
mod transport;

pub use client::StructuringClient;
pub use gemini::GeminiTransport;
pub use outcome::{FallbackData, ParseOutcome};
pub use prompt::build_prompt;
pub use response::{extract_json_candidate, parse_model_output};
pub use transport::{GenerationRequest, GenerationResponse, LlmTransport, TokenUsage, TransportError};

#[cfg(test)]
pub(crate) use client::tests::{ScriptedTransport, VALID_ANSWER, text as scripted_text};
