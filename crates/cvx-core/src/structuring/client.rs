//! Attempt loop with progressive timeouts, retries and model fallback.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StructuringError;
use crate::models::config::StructuringConfig;
use crate::models::document::DocumentText;
use crate::models::record::{StructuredRecord, missing_required_keys};

use super::outcome::{FallbackData, ParseOutcome};
use super::prompt::build_prompt;
use super::response::parse_model_output;
use super::transport::{GenerationRequest, GenerationResponse, LlmTransport, TokenUsage, TransportError};

/// Result of a single attempt against one model.
#[derive(Debug)]
enum AttemptResult {
    Ok {
        data: Value,
        raw: String,
        usage: TokenUsage,
    },
    /// Another attempt on the same model may succeed.
    Retryable {
        error: StructuringError,
        raw: Option<String>,
    },
    /// The whole run must stop.
    Fatal(StructuringError),
    /// This model will not succeed; move to the next one.
    SkipModel(StructuringError),
}

/// How the attempt loop of one model ended.
enum ModelOutcome {
    Succeeded {
        data: Value,
        raw: String,
        usage: TokenUsage,
    },
    Failed(StructuringError),
    Aborted(StructuringError),
}

/// Turns document text into a structured record through an LLM.
pub struct StructuringClient<T: LlmTransport> {
    transport: T,
    config: StructuringConfig,
}

impl<T: LlmTransport> StructuringClient<T> {
    /// Create a client.
    ///
    /// An out-of-range config is logged but still used: backoff delays are
    /// saturated and a zero retry count still makes one attempt per model.
    pub fn new(transport: T, config: StructuringConfig) -> Self {
        if let Err(e) = config.validate() {
            warn!("Structuring config: {}", e);
        }
        Self { transport, config }
    }

    pub fn config(&self) -> &StructuringConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Structure a document's text.
    ///
    /// Never fails: every error ends up in [`ParseOutcome::Failure`].
    pub async fn structure(
        &self,
        text: &DocumentText,
        cancel: Option<&CancellationToken>,
    ) -> ParseOutcome {
        if text.is_blank() {
            warn!("No text to structure, skipping LLM call");
            return ParseOutcome::Failure {
                error: StructuringError::EmptyInput,
                raw_response: None,
                attempts: 0,
                fallback_data: None,
            };
        }

        let request = GenerationRequest::new(build_prompt(text.as_str()), &self.config);
        let models = self.config.model_chain();

        let mut attempts = 0u32;
        let mut last_raw: Option<String> = None;
        let mut last_error: Option<StructuringError> = None;

        for (index, model) in models.iter().enumerate() {
            if index > 0 {
                info!("Falling back to {}", model);
            }

            match self
                .run_model(model, &request, cancel, &mut attempts, &mut last_raw)
                .await
            {
                ModelOutcome::Succeeded { data, raw, usage } => {
                    let missing_keys = missing_required_keys(&data);
                    if !missing_keys.is_empty() {
                        warn!("{} answer lacks keys: {}", model, missing_keys.join(", "));
                    }
                    info!("Structured with {} after {} attempts", model, attempts);

                    return ParseOutcome::Success {
                        data,
                        raw_response: raw,
                        model_used: model.clone(),
                        attempts,
                        token_usage: usage,
                        fallback_used: index > 0,
                        missing_keys,
                    };
                }
                ModelOutcome::Failed(error) => {
                    warn!("{} gave up: {}", model, error);
                    last_error = Some(error);
                }
                ModelOutcome::Aborted(error) => {
                    warn!("Structuring aborted: {}", error);
                    return ParseOutcome::Failure {
                        error,
                        raw_response: last_raw,
                        attempts,
                        fallback_data: None,
                    };
                }
            }
        }

        let last = last_error.unwrap_or_else(|| StructuringError::Connection("no model configured".to_string()));
        let error = StructuringError::Exhausted {
            models: models.join(", "),
            last: Box::new(last),
        };
        warn!("{}", error);

        ParseOutcome::Failure {
            error,
            raw_response: last_raw,
            attempts,
            fallback_data: Some(FallbackData {
                data: StructuredRecord::default(),
                text_excerpt: text.excerpt(self.config.excerpt_chars),
            }),
        }
    }

    async fn run_model(
        &self,
        model: &str,
        request: &GenerationRequest,
        cancel: Option<&CancellationToken>,
        attempts: &mut u32,
        last_raw: &mut Option<String>,
    ) -> ModelOutcome {
        let max_attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return ModelOutcome::Aborted(StructuringError::Cancelled);
            }

            let timeout = self.config.timeout_for_attempt(attempt);
            *attempts += 1;
            info!(
                "Structuring with {} (attempt {}/{}, timeout {}s)",
                model,
                attempt + 1,
                max_attempts,
                timeout.as_secs()
            );

            let result = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return ModelOutcome::Aborted(StructuringError::Cancelled),
                    result = self.attempt(model, request, timeout) => result,
                },
                None => self.attempt(model, request, timeout).await,
            };

            match result {
                AttemptResult::Ok { data, raw, usage } => {
                    return ModelOutcome::Succeeded { data, raw, usage };
                }
                AttemptResult::SkipModel(error) => return ModelOutcome::Failed(error),
                AttemptResult::Fatal(error) => return ModelOutcome::Aborted(error),
                AttemptResult::Retryable { error, raw } => {
                    if raw.is_some() {
                        *last_raw = raw;
                    }

                    let attempt_number = attempt + 1;
                    if attempt_number < max_attempts {
                        let rate_limited = matches!(error, StructuringError::RateLimited { .. });
                        let delay = self.config.backoff_after(attempt_number, rate_limited);
                        warn!(
                            "{} attempt {} failed ({}), retrying in {:.1}s",
                            model,
                            attempt_number,
                            error,
                            delay.as_secs_f64()
                        );
                        if pause(delay, cancel).await {
                            return ModelOutcome::Aborted(StructuringError::Cancelled);
                        }
                    } else {
                        warn!("{} attempt {} failed ({})", model, attempt_number, error);
                    }

                    last_error = Some(error);
                }
            }
        }

        ModelOutcome::Failed(last_error.unwrap_or(StructuringError::MalformedOutput {
            reason: "no attempt was made".to_string(),
        }))
    }

    async fn attempt(&self, model: &str, request: &GenerationRequest, timeout: Duration) -> AttemptResult {
        let response = match tokio::time::timeout(timeout, self.transport.generate(model, request, timeout)).await {
            Ok(response) => response,
            Err(_) => Err(TransportError::Timeout),
        };

        match response {
            Ok(GenerationResponse::Blocked { reason }) => {
                AttemptResult::SkipModel(StructuringError::ContentFiltered { reason })
            }
            Ok(GenerationResponse::Text { text, usage }) => match parse_model_output(&text) {
                Ok(data) => {
                    debug!("{} returned {} characters of JSON", model, text.len());
                    AttemptResult::Ok { data, raw: text, usage }
                }
                Err(error) => AttemptResult::Retryable { error, raw: Some(text) },
            },
            Err(e) => {
                let error = e.into_structuring(timeout);
                if error.is_retryable() {
                    AttemptResult::Retryable { error, raw: None }
                } else {
                    AttemptResult::Fatal(error)
                }
            }
        }
    }
}

/// Sleep for `delay`; returns true when cancelled first.
async fn pause(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        },
        None => {
            tokio::time::sleep(delay).await;
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    pub(crate) const VALID_ANSWER: &str = r#"{"nom": "J. DUP", "titre": "Ingénieur logiciel", "competences": {"langages_programmation": ["Rust"], "logiciels_techniques": [], "competences_generales": [], "competences_manageriales": []}, "experience_professionnelle": [], "formation": [], "langues": ["Français – Courant"]}"#;

    /// Transport replaying a fixed script of responses.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Result<GenerationResponse, TransportError>>>,
        calls: Mutex<Vec<(String, Duration)>>,
        cancel_on_call: Option<CancellationToken>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Result<GenerationResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn cancelling(mut self, token: CancellationToken) -> Self {
            self.cancel_on_call = Some(token);
            self
        }

        pub(crate) fn calls(&self) -> Vec<(String, Duration)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmTransport for ScriptedTransport {
        async fn generate(
            &self,
            model: &str,
            _request: &GenerationRequest,
            timeout: Duration,
        ) -> Result<GenerationResponse, TransportError> {
            self.calls.lock().unwrap().push((model.to_string(), timeout));
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Connection("script exhausted".into())))
        }
    }

    pub(crate) fn text(body: &str) -> Result<GenerationResponse, TransportError> {
        Ok(GenerationResponse::Text {
            text: body.to_string(),
            usage: TokenUsage { prompt: 1200, candidates: 300, total: 1500 },
        })
    }

    fn http(status: u16) -> Result<GenerationResponse, TransportError> {
        Err(TransportError::Http { status, body: format!("status {status}") })
    }

    fn config(fallbacks: &[&str]) -> StructuringConfig {
        StructuringConfig {
            primary_model: "primary".into(),
            fallback_models: fallbacks.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Paused-clock timers may round their deadline up by a millisecond.
    fn assert_elapsed(start: Instant, secs: u64) {
        let elapsed = start.elapsed();
        let expected = Duration::from_secs(secs);
        assert!(
            elapsed >= expected && elapsed <= expected + Duration::from_millis(10),
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    /// Transport that never answers within any attempt deadline.
    struct Stalled;

    #[async_trait]
    impl LlmTransport for Stalled {
        async fn generate(
            &self,
            _model: &str,
            _request: &GenerationRequest,
            _timeout: Duration,
        ) -> Result<GenerationResponse, TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(TransportError::Connection("unreachable".into()))
        }
    }

    fn document() -> DocumentText {
        DocumentText::new("Jean Dupont Ingénieur logiciel Expérience Formation".into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let client = StructuringClient::new(ScriptedTransport::new(vec![text(VALID_ANSWER)]), config(&["backup"]));
        let outcome = client.structure(&document(), None).await;

        match outcome {
            ParseOutcome::Success { model_used, attempts, fallback_used, missing_keys, token_usage, .. } => {
                assert_eq!(model_used, "primary");
                assert_eq!(attempts, 1);
                assert!(!fallback_used);
                assert!(missing_keys.is_empty());
                assert_eq!(token_usage.total, 1500);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_progressive_timeouts_and_linear_backoff() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            text(VALID_ANSWER),
        ]);
        let client = StructuringClient::new(transport, config(&[]));

        let start = Instant::now();
        let outcome = client.structure(&document(), None).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
        // 2s after attempt 1, 4s after attempt 2
        assert_elapsed(start, 6);

        let timeouts: Vec<u64> = client.transport().calls().iter().map(|(_, t)| t.as_secs()).collect();
        assert_eq!(timeouts, vec![60, 90, 120]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_doubles_backoff() {
        let client = StructuringClient::new(
            ScriptedTransport::new(vec![http(429), text(VALID_ANSWER)]),
            config(&[]),
        );

        let start = Instant::now();
        let outcome = client.structure(&document(), None).await;

        assert!(outcome.is_success());
        assert_elapsed(start, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_model_succeeds() {
        let transport = ScriptedTransport::new(vec![http(503), http(503), http(500), text(VALID_ANSWER)]);
        let client = StructuringClient::new(transport, config(&["backup", "last-resort"]));

        let start = Instant::now();
        let outcome = client.structure(&document(), None).await;

        match &outcome {
            ParseOutcome::Success { model_used, attempts, fallback_used, .. } => {
                assert_eq!(model_used, "backup");
                assert_eq!(*attempts, 4);
                assert!(*fallback_used);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // No sleep after the primary's final attempt.
        assert_elapsed(start, 6);

        let models: Vec<String> = client.transport().calls().into_iter().map(|(m, _)| m).collect();
        assert_eq!(models, vec!["primary", "primary", "primary", "backup"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_models_fail_with_fallback_data() {
        let script = (0..6).map(|_| http(502)).collect();
        let client = StructuringClient::new(ScriptedTransport::new(script), config(&["backup"]));

        let outcome = client.structure(&document(), None).await;

        match outcome {
            ParseOutcome::Failure { error, attempts, fallback_data, raw_response } => {
                assert_eq!(attempts, 6);
                assert_eq!(error.kind(), "exhausted");
                assert!(error.to_string().contains("primary, backup"));
                assert_eq!(raw_response, None);

                let fallback = fallback_data.expect("fallback data");
                assert_eq!(fallback.data, StructuredRecord::default());
                assert_eq!(fallback.text_excerpt, document().as_str());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_aborts_without_fallback() {
        let client = StructuringClient::new(
            ScriptedTransport::new(vec![http(400), text(VALID_ANSWER)]),
            config(&["backup"]),
        );

        let outcome = client.structure(&document(), None).await;

        match outcome {
            ParseOutcome::Failure { error, attempts, fallback_data, .. } => {
                assert_eq!(attempts, 1);
                assert!(matches!(error, StructuringError::ClientHttp { status: 400, .. }));
                assert!(fallback_data.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.transport().calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_filter_skips_to_next_model() {
        let transport = ScriptedTransport::new(vec![
            Ok(GenerationResponse::Blocked { reason: "SAFETY".into() }),
            text(VALID_ANSWER),
        ]);
        let client = StructuringClient::new(transport, config(&["backup"]));

        let start = Instant::now();
        let outcome = client.structure(&document(), None).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
        assert_elapsed(start, 0);

        let models: Vec<String> = client.transport().calls().into_iter().map(|(m, _)| m).collect();
        assert_eq!(models, vec!["primary", "backup"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_filter_without_fallback_fails() {
        let transport = ScriptedTransport::new(vec![Ok(GenerationResponse::Blocked { reason: "SAFETY".into() })]);
        let client = StructuringClient::new(transport, config(&[]));

        let outcome = client.structure(&document(), None).await;

        let Some(StructuringError::Exhausted { last, .. }) = outcome.error() else {
            panic!("expected exhausted failure: {outcome:?}");
        };
        assert!(matches!(**last, StructuringError::ContentFiltered { .. }));
        assert_eq!(outcome.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_output_is_retried() {
        let transport = ScriptedTransport::new(vec![
            text("Désolé, je ne peux pas."),
            text(&format!("Voici :\n```json\n{VALID_ANSWER}\n```")),
        ]);
        let client = StructuringClient::new(transport, config(&[]));

        let outcome = client.structure(&document(), None).await;
        let record = outcome.record().expect("record");
        assert_eq!(record.display_name, "J. DUP");
        assert_eq!(record.competencies.programming_languages, vec!["Rust"]);
        assert_eq!(outcome.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_output_keeps_last_raw_text() {
        let transport = ScriptedTransport::new(vec![
            text("not json"),
            text("{broken"),
            text("{\"nom\": }"),
        ]);
        let client = StructuringClient::new(transport, config(&[]));

        let outcome = client.structure(&document(), None).await;

        match outcome {
            ParseOutcome::Failure { raw_response, attempts, error, .. } => {
                assert_eq!(raw_response.as_deref(), Some("{\"nom\": }"));
                assert_eq!(attempts, 3);
                let StructuringError::Exhausted { last, .. } = error else {
                    panic!("expected exhausted");
                };
                assert_eq!(last.kind(), "malformed_output");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_keys_are_diagnostics() {
        let client = StructuringClient::new(
            ScriptedTransport::new(vec![text(r#"{"nom": "J. DUP", "titre": "Dev"}"#)]),
            config(&[]),
        );

        let outcome = client.structure(&document(), None).await;

        let ParseOutcome::Success { missing_keys, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(
            missing_keys,
            vec!["competences", "experience_professionnelle", "formation", "langues"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_is_not_sent() {
        let client = StructuringClient::new(ScriptedTransport::new(vec![]), config(&[]));

        let outcome = client.structure(&DocumentText::new("  \n ".into()), None).await;

        assert_eq!(outcome.error(), Some(&StructuringError::EmptyInput));
        assert_eq!(outcome.attempts(), 0);
        assert!(client.transport().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let token = CancellationToken::new();
        let transport = ScriptedTransport::new(vec![http(503), text(VALID_ANSWER)]).cancelling(token.clone());
        let client = StructuringClient::new(transport, config(&["backup"]));

        let outcome = client.structure(&document(), Some(&token)).await;

        assert_eq!(outcome.error(), Some(&StructuringError::Cancelled));
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(client.transport().calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let client = StructuringClient::new(ScriptedTransport::new(vec![text(VALID_ANSWER)]), config(&[]));

        let outcome = client.structure(&document(), Some(&token)).await;

        assert_eq!(outcome.error(), Some(&StructuringError::Cancelled));
        assert_eq!(outcome.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncancelled_token_changes_nothing() {
        let token = CancellationToken::new();
        let client = StructuringClient::new(
            ScriptedTransport::new(vec![http(503), text(VALID_ANSWER)]),
            config(&[]),
        );

        let outcome = client.structure(&document(), Some(&token)).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_hits_attempt_deadline() {
        let client = StructuringClient::new(
            Stalled,
            StructuringConfig { max_retries: 2, fallback_models: vec![], ..Default::default() },
        );

        let start = Instant::now();
        let outcome = client.structure(&document(), None).await;

        // 60s + 2s backoff + 90s
        assert_elapsed(start, 152);
        let Some(StructuringError::Exhausted { last, .. }) = outcome.error() else {
            panic!("expected exhausted failure");
        };
        assert_eq!(**last, StructuringError::Timeout { timeout: Duration::from_secs(90) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_pending_request() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });
        let client = StructuringClient::new(Stalled, config(&["backup"]));

        let start = Instant::now();
        let outcome = client.structure(&document(), Some(&token)).await;

        assert_eq!(outcome.error(), Some(&StructuringError::Cancelled));
        assert_eq!(outcome.attempts(), 1);
        assert!(matches!(outcome, ParseOutcome::Failure { fallback_data: None, .. }));
        // Cut short at 5s, well before the 60s attempt deadline.
        assert_elapsed(start, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_retry_delay_retries_immediately() {
        let config = StructuringConfig {
            retry_delay_secs: -1.0,
            ..config(&[])
        };
        let client = StructuringClient::new(
            ScriptedTransport::new(vec![http(503), text(VALID_ANSWER)]),
            config,
        );

        let start = Instant::now();
        let outcome = client.structure(&document(), None).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
        assert_elapsed(start, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_delay_does_not_panic() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            canceller.cancel();
        });
        let config = StructuringConfig {
            retry_delay_secs: 1e20,
            ..config(&[])
        };
        let client = StructuringClient::new(
            ScriptedTransport::new(vec![http(503), text(VALID_ANSWER)]),
            config,
        );

        let outcome = client.structure(&document(), Some(&token)).await;

        // The saturated backoff is still cancellable.
        assert_eq!(outcome.error(), Some(&StructuringError::Cancelled));
        assert_eq!(outcome.attempts(), 1);
    }
}
