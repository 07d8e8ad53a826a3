//! Frame normalization: provider-specific frames to canonical events.
//!
//! A [`Normalizer`] consumes decoded provider frames (`serde_json::Value`)
//! and yields canonical [`StreamEvent`]s. One frame may produce zero, one,
//! or several events; ordering is preserved. Tool-call arguments stream as
//! partial JSON and are buffered until they parse, at which point a single
//! `Message` event is emitted.

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{L0Error, Result};
use crate::event::{Role, StreamEvent, Usage};

/// Maps provider frames to canonical events.
///
/// `finish` flushes buffered state after the wire stream ends; it emits the
/// terminal `Complete` event only if the provider actually signaled a
/// finish, so a torn connection never looks like success.
pub trait Normalizer: Send + Sync + std::fmt::Debug {
    /// Registry name (`"openai"`, `"ollama"`).
    fn name(&self) -> &'static str;

    /// Normalize one provider frame.
    fn normalize(&mut self, frame: &Value) -> Vec<StreamEvent>;

    /// Flush after end of wire stream.
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Look up a normalizer by registry name.
pub fn normalizer_named(name: &str) -> Result<Box<dyn Normalizer>> {
    match name {
        "openai" => Ok(Box::new(OpenAiNormalizer::new())),
        "ollama" => Ok(Box::new(OllamaNormalizer::new())),
        other => Err(L0Error::adapter_not_found(other)),
    }
}

/// A fully assembled tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    /// Serialize into the `Message` event payload format.
    pub fn to_message_value(&self) -> String {
        json!({
            "type": "tool_call",
            "id": self.id,
            "name": self.name,
            "arguments": self.arguments,
        })
        .to_string()
    }

    /// Parse a `Message` payload back into a tool call, if it is one.
    pub fn from_message_value(value: &str) -> Option<ToolCall> {
        let parsed: Value = serde_json::from_str(value).ok()?;
        if parsed.get("type")?.as_str()? != "tool_call" {
            return None;
        }
        Some(ToolCall {
            id: parsed.get("id")?.as_str()?.to_string(),
            name: parsed.get("name")?.as_str()?.to_string(),
            arguments: parsed.get("arguments")?.clone(),
        })
    }
}

/// Whether a JSON fragment has balanced delimiters outside of strings.
///
/// A cheap pre-check before attempting a full parse on every streamed
/// argument fragment.
fn json_balanced(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return false;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for ch in trimmed.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' && in_string {
            escaped = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match ch {
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0 && !in_string
}

#[derive(Debug, Default)]
struct ToolEntry {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    emitted: bool,
}

/// Accumulates streamed tool-call fragments until the arguments parse.
#[derive(Debug, Default)]
pub struct ToolCallBuffer {
    entries: Vec<ToolEntry>,
}

impl ToolCallBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns the completed call the first time the
    /// buffered arguments form valid JSON.
    pub fn push(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        fragment: &str,
    ) -> Option<ToolCall> {
        if self.entries.len() <= index {
            self.entries.resize_with(index + 1, ToolEntry::default);
        }
        let entry = &mut self.entries[index];
        if let Some(id) = id {
            entry.id.get_or_insert_with(|| id.to_string());
        }
        if let Some(name) = name {
            entry.name.get_or_insert_with(|| name.to_string());
        }
        entry.arguments.push_str(fragment);

        if entry.emitted || !json_balanced(&entry.arguments) {
            return None;
        }
        let arguments: Value = serde_json::from_str(entry.arguments.trim()).ok()?;
        entry.emitted = true;
        Some(ToolCall {
            id: entry.id.clone().unwrap_or_default(),
            name: entry.name.clone().unwrap_or_default(),
            arguments,
        })
    }

    /// Flush entries whose arguments never became valid JSON.
    ///
    /// Called at end of stream; a still-unparseable argument string is
    /// surfaced as-is so nothing is silently dropped.
    pub fn flush(&mut self) -> Vec<ToolCall> {
        let mut out = Vec::new();
        for entry in &mut self.entries {
            if entry.emitted || entry.arguments.trim().is_empty() {
                continue;
            }
            entry.emitted = true;
            out.push(ToolCall {
                id: entry.id.clone().unwrap_or_default(),
                name: entry.name.clone().unwrap_or_default(),
                arguments: Value::String(entry.arguments.clone()),
            });
        }
        out
    }
}

fn usage_from_openai(frame: &Value) -> Option<Usage> {
    let usage = frame.get("usage")?;
    if usage.is_null() {
        return None;
    }
    Some(Usage {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
    })
}

/// Normalizer for OpenAI-compatible chat-completion SSE frames.
#[derive(Debug, Default)]
pub struct OpenAiNormalizer {
    tool_calls: ToolCallBuffer,
    usage: Option<Usage>,
    saw_finish: bool,
}

impl OpenAiNormalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Normalizer for OpenAiNormalizer {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn normalize(&mut self, frame: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(usage) = usage_from_openai(frame) {
            self.usage = Some(usage);
        }

        let Some(choices) = frame.get("choices").and_then(Value::as_array) else {
            return events;
        };
        for choice in choices {
            if let Some(delta) = choice.get("delta") {
                if let Some(content) = delta.get("content").and_then(Value::as_str) {
                    if !content.is_empty() {
                        events.push(StreamEvent::token(content));
                    }
                }
                if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                    for call in calls {
                        let index =
                            call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                        let id = call.get("id").and_then(Value::as_str);
                        let function = call.get("function");
                        let name = function
                            .and_then(|f| f.get("name"))
                            .and_then(Value::as_str);
                        let fragment = function
                            .and_then(|f| f.get("arguments"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if let Some(complete) =
                            self.tool_calls.push(index, id, name, fragment)
                        {
                            debug!(tool = %complete.name, "tool call arguments complete");
                            events.push(StreamEvent::message(
                                Role::Assistant,
                                complete.to_message_value(),
                            ));
                        }
                    }
                }
            }
            if choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .is_some()
            {
                self.saw_finish = true;
            }
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = self
            .tool_calls
            .flush()
            .into_iter()
            .map(|call| StreamEvent::message(Role::Assistant, call.to_message_value()))
            .collect();
        if self.saw_finish {
            events.push(StreamEvent::Complete {
                usage: self.usage.take(),
            });
        }
        events
    }
}

fn usage_from_ollama(frame: &Value) -> Option<Usage> {
    let completion = frame.get("eval_count").and_then(Value::as_u64);
    let prompt = frame.get("prompt_eval_count").and_then(Value::as_u64);
    if completion.is_none() && prompt.is_none() {
        return None;
    }
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: match (prompt, completion) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        },
    })
}

/// Normalizer for Ollama NDJSON frames (`/api/generate` and `/api/chat`).
#[derive(Debug, Default)]
pub struct OllamaNormalizer {
    usage: Option<Usage>,
    saw_finish: bool,
}

impl OllamaNormalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Normalizer for OllamaNormalizer {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn normalize(&mut self, frame: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        let content = frame
            .get("response")
            .and_then(Value::as_str)
            .or_else(|| {
                frame
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_str)
            });
        if let Some(text) = content {
            if !text.is_empty() {
                events.push(StreamEvent::token(text));
            }
        }

        if frame.get("done").and_then(Value::as_bool) == Some(true) {
            self.saw_finish = true;
            if let Some(usage) = usage_from_ollama(frame) {
                self.usage = Some(usage);
            }
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.saw_finish {
            vec![StreamEvent::Complete {
                usage: self.usage.take(),
            }]
        } else {
            Vec::new()
        }
    }
}

/// Chunk-to-frame decoding, implemented by the wire decoders.
pub trait FrameDecoder: Send {
    /// Feed raw bytes, get complete frames.
    fn decode_chunk(&mut self, chunk: &[u8]) -> Vec<Value>;
    /// Flush buffered bytes after end of stream.
    fn flush_frames(&mut self) -> Vec<Value>;
}

impl FrameDecoder for super::SseDecoder {
    fn decode_chunk(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.decode(chunk)
    }

    fn flush_frames(&mut self) -> Vec<Value> {
        self.flush()
    }
}

impl FrameDecoder for super::NdjsonDecoder {
    fn decode_chunk(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.decode(chunk)
    }

    fn flush_frames(&mut self) -> Vec<Value> {
        self.flush().into_iter().collect()
    }
}

/// Convert an HTTP response body into a canonical event stream.
///
/// Shared by the bundled HTTP sources: `bytes_stream()` → frame decoder →
/// normalizer → flush. Transport errors surface as stream errors and end
/// the stream.
pub(crate) fn wire_event_stream(
    response: reqwest::Response,
    decoder: impl FrameDecoder + 'static,
    normalizer: Box<dyn Normalizer>,
) -> super::EventStream {
    use futures::StreamExt;
    use std::collections::VecDeque;

    struct WireState {
        bytes: std::pin::Pin<
            Box<dyn futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>,
        >,
        decoder: Box<dyn FrameDecoder>,
        normalizer: Box<dyn Normalizer>,
        pending: VecDeque<StreamEvent>,
        done: bool,
    }

    let state = WireState {
        bytes: Box::pin(response.bytes_stream()),
        decoder: Box::new(decoder),
        normalizer,
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.decode_chunk(&chunk) {
                        state.pending.extend(state.normalizer.normalize(&frame));
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(L0Error::from(err)), state));
                }
                None => {
                    for frame in state.decoder.flush_frames() {
                        state.pending.extend(state.normalizer.normalize(&frame));
                    }
                    state.pending.extend(state.normalizer.finish());
                    state.done = true;
                }
            }
        }
    }))
}
