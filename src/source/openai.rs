//! Streaming source for OpenAI-compatible chat-completion APIs.
//!
//! Posts to `/v1/chat/completions` with `stream: true` and turns the SSE
//! response into canonical events. On a continuation attempt the resume
//! prompt replaces the configured user prompt.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::normalize::{wire_event_stream, OpenAiNormalizer};
use super::{EventStream, SseDecoder, StreamRequest, StreamSource};
use crate::error::{L0Error, Result};

/// OpenAI-compatible streaming source.
///
/// Works against any endpoint speaking the chat-completions SSE protocol
/// (OpenAI, Groq, Together, vLLM, and friends).
#[derive(Debug, Clone)]
pub struct OpenAiSource {
    client: Client,
    base_url: String,
    model: String,
    prompt: String,
    system_prompt: Option<String>,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiSource {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: None,
            api_key: None,
            temperature: 0.7,
            max_tokens: 2048,
        }
    }

    /// Use a shared HTTP client instead of a fresh one.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Send `Authorization: Bearer {key}`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set a system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the completion token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Build the request body. A continuation attempt swaps in the resume
    /// prompt produced by the runtime.
    fn build_body(&self, request: &StreamRequest) -> Value {
        let prompt = request.continuation_prompt().unwrap_or(&self.prompt);

        let mut messages = Vec::new();
        if let Some(ref system) = self.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": true,
            "stream_options": {"include_usage": true},
        })
    }
}

#[async_trait]
impl StreamSource for OpenAiSource {
    async fn open(&self, request: &StreamRequest) -> Result<EventStream> {
        let url = self.endpoint();
        let body = self.build_body(request);
        debug!(%url, model = %self.model, attempt = request.attempt, "opening openai stream");

        let mut http = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .map_err(|e| L0Error::network(format!("failed to connect to {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(L0Error::provider(status.as_u16(), text));
        }

        Ok(wire_event_stream(
            response,
            SseDecoder::new(),
            Box::new(OpenAiNormalizer::new()),
        ))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ContinuationHint;

    fn source() -> OpenAiSource {
        OpenAiSource::new("https://api.example.com/", "gpt-4o", "Tell me about Rust")
            .with_system("You are terse.")
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        assert_eq!(
            source().endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_build_body_shape() {
        let body = source().build_body(&StreamRequest::default());
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);

        let messages = body["messages"].as_array().expect("messages array");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are terse.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "Tell me about Rust");
    }

    #[test]
    fn test_build_body_without_system() {
        let source = OpenAiSource::new("https://api.example.com", "gpt-4o", "hi");
        let body = source.build_body(&StreamRequest::default());
        let messages = body["messages"].as_array().expect("messages array");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_continuation_prompt_replaces_user_prompt() {
        let request = StreamRequest {
            attempt: 2,
            is_retry: true,
            continuation: Some(ContinuationHint {
                checkpoint: "Rust is".into(),
                token_count: 2,
                prompt: "Continue: Rust is".into(),
            }),
            ..Default::default()
        };
        let body = source().build_body(&request);
        let messages = body["messages"].as_array().expect("messages array");
        assert_eq!(messages[1]["content"], "Continue: Rust is");
    }

    #[test]
    fn test_sampling_knobs() {
        let body = source()
            .with_temperature(0.1)
            .with_max_tokens(64)
            .build_body(&StreamRequest::default());
        assert_eq!(body["temperature"], 0.1);
        assert_eq!(body["max_tokens"], 64);
    }
}
