//! Streaming source for Ollama's native API.
//!
//! Uses `/api/generate` for prompt-only calls and `/api/chat` when a system
//! prompt is configured; streaming is NDJSON with one frame per line. On a
//! continuation attempt the resume prompt replaces the configured prompt.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::normalize::{wire_event_stream, OllamaNormalizer};
use super::{EventStream, NdjsonDecoder, StreamRequest, StreamSource};
use crate::error::{L0Error, Result};

/// Ollama streaming source.
#[derive(Debug, Clone)]
pub struct OllamaSource {
    client: Client,
    base_url: String,
    model: String,
    prompt: String,
    system_prompt: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

impl OllamaSource {
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
            temperature: 0.7,
            max_tokens: 2048,
        }
    }

    /// Use a shared HTTP client instead of a fresh one.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Set a system prompt (switches to the `/api/chat` endpoint).
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

    fn use_chat(&self) -> bool {
        self.system_prompt.as_ref().is_some_and(|s| !s.is_empty())
    }

    fn endpoint(&self) -> String {
        if self.use_chat() {
            format!("{}/api/chat", self.base_url)
        } else {
            format!("{}/api/generate", self.base_url)
        }
    }

    fn build_body(&self, request: &StreamRequest) -> Value {
        let prompt = request.continuation_prompt().unwrap_or(&self.prompt);
        let options = json!({
            "temperature": self.temperature,
            "num_predict": self.max_tokens,
        });

        if self.use_chat() {
            let mut messages = Vec::new();
            if let Some(ref system) = self.system_prompt {
                messages.push(json!({"role": "system", "content": system}));
            }
            messages.push(json!({"role": "user", "content": prompt}));
            json!({
                "model": self.model,
                "messages": messages,
                "stream": true,
                "options": options,
            })
        } else {
            json!({
                "model": self.model,
                "prompt": prompt,
                "stream": true,
                "options": options,
            })
        }
    }
}

#[async_trait]
impl StreamSource for OllamaSource {
    async fn open(&self, request: &StreamRequest) -> Result<EventStream> {
        let url = self.endpoint();
        let body = self.build_body(request);
        debug!(%url, model = %self.model, attempt = request.attempt, "opening ollama stream");

        let response = self
            .client
            .post(&url)
            .json(&body)
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
            NdjsonDecoder::new(),
            Box::new(OllamaNormalizer::new()),
        ))
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
