//! Model-backed extraction.
//!
//! The prompt lists the document's spans by index and asks for a JSON list
//! of facts. Calls are bounded: each attempt runs under a timeout, failed
//! attempts back off exponentially, and once the attempts are spent the
//! last error is surfaced. Output goes through [`super::candidate`] before
//! anything becomes a fact.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{DocumentId, TextSpan};
use super::candidate::{parse_candidates, resolve};
use super::{DEFAULT_CONFIDENCE_THRESHOLD, Extraction, ExtractionError, Extractor};

/// A text completion endpoint.
#[async_trait]
pub trait ModelClient: Send + Sync + 'static {
    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError>;
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub struct ModelExtractor {
    client: Arc<dyn ModelClient>,
    policy: RetryPolicy,
    threshold: f64,
    name: String,
}

impl ModelExtractor {
    pub fn new(client: Arc<dyn ModelClient>, model: &str) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            name: format!("model:{model}"),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Call the model until it answers, retrying transient failures.
    async fn complete_with_retry(&self, prompt: &str) -> Result<String, ExtractionError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.policy.call_timeout, self.client.complete(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(ExtractionError::Timeout(self.policy.call_timeout)),
            };
            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        extractor = %self.name,
                        attempt = attempt + 1,
                        wait_ms = delay.as_millis() as u64,
                        error = %e,
                        "model call failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Extractor for ModelExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(
        &self,
        document_id: &DocumentId,
        spans: &[TextSpan],
    ) -> Result<Extraction, ExtractionError> {
        if spans.is_empty() {
            return Ok(Extraction::new());
        }
        let prompt = build_prompt(document_id, spans);
        let text = self.complete_with_retry(&prompt).await?;
        let facts = parse_candidates(&text)?;
        let mut extraction = resolve(facts, spans, &self.name)?;
        extraction.flag_low_confidence(self.threshold);
        tracing::debug!(
            document = %document_id,
            entities = extraction.entities.len(),
            relations = extraction.relations.len(),
            "model extraction finished"
        );
        Ok(extraction)
    }
}

const INSTRUCTIONS: &str = "Extract entities and relations from the numbered text spans below. \
Answer with JSON only: {\"facts\": [...]}. Each fact is either \
{\"kind\": \"entity\", \"type\": T, \"label\": L, \"properties\": {..}, \"confidence\": C, \"span\": N} or \
{\"kind\": \"relation\", \"subject\": {\"type\": T, \"label\": L}, \"predicate\": P, \
\"object\": {\"type\": T, \"label\": L}, \"properties\": {..}, \"confidence\": C, \"span\": N}, \
where C is between 0 and 1 and N is the span number.";

fn build_prompt(document_id: &DocumentId, spans: &[TextSpan]) -> String {
    let mut prompt = format!("{INSTRUCTIONS}\n\nDocument {document_id}\n");
    for (i, span) in spans.iter().enumerate() {
        prompt.push_str(&format!("[{i}] (page {}) {}\n", span.page, span.text));
    }
    prompt
}

// ============================================================================
// HTTP client (OpenAI-compatible)
// ============================================================================

#[cfg(feature = "remote-model")]
pub use http::HttpModelClient;

#[cfg(feature = "remote-model")]
mod http {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize)]
    struct ChatRequest<'a> {
        model: &'a str,
        messages: Vec<ChatMessage<'a>>,
        temperature: f32,
    }

    #[derive(Serialize)]
    struct ChatMessage<'a> {
        role: &'a str,
        content: &'a str,
    }

    #[derive(Deserialize)]
    struct ChatResponse {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: ResponseMessage,
    }

    #[derive(Deserialize)]
    struct ResponseMessage {
        content: Option<String>,
    }

    /// Calls `{endpoint}/chat/completions`.
    pub struct HttpModelClient {
        http: reqwest::Client,
        endpoint: String,
        model: String,
        api_key: Option<String>,
    }

    impl HttpModelClient {
        pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> crate::Result<Self> {
            let http = reqwest::Client::builder()
                .build()
                .map_err(|e| crate::Error::Config(format!("http client: {e}")))?;
            Ok(Self {
                http,
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                model: model.into(),
                api_key,
            })
        }
    }

    #[async_trait]
    impl ModelClient for HttpModelClient {
        async fn complete(&self, prompt: &str) -> Result<String, ExtractionError> {
            let request = ChatRequest {
                model: &self.model,
                messages: vec![ChatMessage { role: "user", content: prompt }],
                temperature: 0.0,
            };
            let mut builder = self
                .http
                .post(format!("{}/chat/completions", self.endpoint))
                .json(&request);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| ExtractionError::ModelUnavailable(e.to_string()))?;

            match response.status() {
                reqwest::StatusCode::TOO_MANY_REQUESTS | reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                    return Err(ExtractionError::ModelUnavailable(response.status().to_string()));
                }
                s if s.is_server_error() => {
                    return Err(ExtractionError::ModelUnavailable(s.to_string()));
                }
                s if !s.is_success() => {
                    return Err(ExtractionError::MalformedOutput(format!("endpoint returned {s}")));
                }
                _ => {}
            }

            let body: ChatResponse = response
                .json()
                .await
                .map_err(|e| ExtractionError::MalformedOutput(format!("response body: {e}")))?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| ExtractionError::MalformedOutput("empty completion".into()))
        }
    }
}
