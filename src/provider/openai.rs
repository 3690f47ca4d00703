//! OpenAI-compatible chat-completions gateway.
//!
//! Works against OpenAI, Ollama's `/v1` endpoint and other compatible local
//! servers. Array and enum outputs are requested inside an object envelope
//! (`{"elements": [...]}` / `{"result": ...}`) because JSON mode only yields
//! top-level objects; the envelope is removed before the value is returned.

use super::{
    GeneratedOutput, GenerationRequest, GenerationStream, ResponseMetadata, StreamEvent,
    StructuredGenerator, TokenUsage,
};
use crate::error::ApiError;
use crate::types::{OutputMode, RenderMode};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const ARRAY_ENVELOPE_KEY: &str = "elements";
const ENUM_ENVELOPE_KEY: &str = "result";
const DEFAULT_SCHEMA_NAME: &str = "response";

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    stream: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
}

#[derive(Serialize, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    arguments: Option<String>,
}

fn map_http_error(error: reqwest::Error) -> ApiError {
    if let Some(status) = error.status() {
        status_error(status.as_u16(), &error.to_string())
    } else if error.is_timeout() {
        ApiError::ProviderRequestFailed(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ApiError::ProviderRequestFailed(format!("Connection error: {}", error))
    } else {
        ApiError::ProviderError(format!("HTTP error: {}", error))
    }
}

fn status_error(status: u16, detail: &str) -> ApiError {
    match status {
        401 => ApiError::ProviderAuthFailed(format!("Authentication failed: {}", detail)),
        429 => ApiError::ProviderRateLimit(format!("Rate limit exceeded: {}", detail)),
        404 => ApiError::ProviderModelNotFound(format!("Model not found: {}", detail)),
        _ => ApiError::ProviderRequestFailed(format!(
            "Request failed with status {}: {}",
            status, detail
        )),
    }
}

/// Function/schema names must match `^[a-zA-Z0-9_-]+$`.
fn sanitize_name(name: Option<&str>) -> String {
    let cleaned: String = name
        .unwrap_or(DEFAULT_SCHEMA_NAME)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        DEFAULT_SCHEMA_NAME.to_string()
    } else {
        cleaned
    }
}

/// Schema actually sent to the backend for the requested output mode.
fn envelope_schema(request: &GenerationRequest) -> Option<Value> {
    let item_schema = request.schema.json_schema.clone();
    match request.output_mode {
        OutputMode::Object => item_schema,
        OutputMode::Array => Some(json!({
            "type": "object",
            "properties": {
                "elements": {
                    "type": "array",
                    "items": item_schema.unwrap_or_else(|| json!({})),
                }
            },
            "required": [ARRAY_ENVELOPE_KEY],
        })),
        OutputMode::Enum => Some(json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "enum": request.schema.enum_values,
                }
            },
            "required": [ENUM_ENVELOPE_KEY],
        })),
        OutputMode::NoSchema => None,
    }
}

/// Remove the envelope added by [`envelope_schema`]. Backends that ignore the
/// envelope and answer with the bare value are accepted as-is.
fn unwrap_envelope(output_mode: OutputMode, value: Value) -> Value {
    let key = match output_mode {
        OutputMode::Array => ARRAY_ENVELOPE_KEY,
        OutputMode::Enum => ENUM_ENVELOPE_KEY,
        OutputMode::Object | OutputMode::NoSchema => return value,
    };
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key(key) => {
            map.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Drop a surrounding markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn parse_generated_text(output_mode: OutputMode, text: &str) -> Result<Value, ApiError> {
    let candidate = strip_code_fence(text);
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Ok(value),
        Err(_) if output_mode == OutputMode::NoSchema => Ok(Value::String(text.to_string())),
        Err(e) => Err(ApiError::ProviderError(format!(
            "Failed to parse JSON output: {}",
            e
        ))),
    }
}

fn build_request(model: &str, request: &GenerationRequest) -> ChatCompletionRequest {
    let name = sanitize_name(request.schema.name.as_deref());
    let schema = envelope_schema(request);

    let (response_format, tools, tool_choice) = match request.render_mode {
        RenderMode::Tool => {
            let mut function = Map::new();
            function.insert("name".to_string(), Value::String(name.clone()));
            if let Some(description) = &request.schema.description {
                function.insert("description".to_string(), Value::String(description.clone()));
            }
            function.insert(
                "parameters".to_string(),
                schema.unwrap_or_else(|| json!({"type": "object"})),
            );
            (
                None,
                Some(vec![json!({"type": "function", "function": function})]),
                Some(json!({"type": "function", "function": {"name": name}})),
            )
        }
        RenderMode::Json | RenderMode::Auto => {
            let format = match schema {
                Some(schema) => json!({
                    "type": "json_schema",
                    "json_schema": {"name": name, "schema": schema, "strict": false},
                }),
                None => json!({"type": "json_object"}),
            };
            (Some(format), None, None)
        }
    };

    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![OpenAIMessage {
            role: "user".to_string(),
            content: Some(request.prompt.clone()),
            tool_calls: Vec::new(),
        }],
        temperature: request.options.temperature,
        max_tokens: request.options.max_tokens,
        response_format,
        tools,
        tool_choice,
        stream: false,
        extra: request.options.provider_options.clone(),
    }
}

fn extract_value(
    output_mode: OutputMode,
    render_mode: RenderMode,
    message: &OpenAIMessage,
) -> Result<Value, ApiError> {
    let text = match render_mode {
        RenderMode::Tool => message
            .tool_calls
            .first()
            .map(|call| call.function.arguments.as_str())
            .or(message.content.as_deref()),
        RenderMode::Json | RenderMode::Auto => message.content.as_deref(),
    }
    .ok_or_else(|| ApiError::ProviderError("Response contained no output".to_string()))?;
    let value = parse_generated_text(output_mode, text)?;
    Ok(unwrap_envelope(output_mode, value))
}

/// Incremental decoder for a `stream: true` chat-completions body.
///
/// Server-sent events arrive as `data: <chunk>` lines; `data: [DONE]` (or the
/// end of the body) completes the answer, which is then parsed like a
/// non-streamed response.
struct SseParser {
    buffer: Vec<u8>,
    output_mode: OutputMode,
    render_mode: RenderMode,
    provider: String,
    model: String,
    text: String,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
    done: bool,
}

impl SseParser {
    fn new(provider: &str, model: &str, request: &GenerationRequest) -> Self {
        Self {
            buffer: Vec::new(),
            output_mode: request.output_mode,
            render_mode: request.render_mode,
            provider: provider.to_string(),
            model: model.to_string(),
            text: String::new(),
            finish_reason: None,
            usage: None,
            done: false,
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    /// Consume body bytes; complete lines become events.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, ApiError>> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.handle_line(&String::from_utf8_lossy(&line), &mut events);
        }
        events
    }

    /// The body ended; flush a trailing line and complete if `[DONE]` never came.
    fn finish(&mut self) -> Vec<Result<StreamEvent, ApiError>> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.handle_line(&String::from_utf8_lossy(&line), &mut events);
        }
        if !self.done {
            events.push(self.complete());
        }
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<Result<StreamEvent, ApiError>>) {
        if self.done {
            return;
        }
        let Some(data) = line.trim_end_matches(['\r', '\n']).strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            events.push(self.complete());
            return;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.done = true;
                events.push(Err(ApiError::ProviderError(format!(
                    "Malformed stream chunk: {}",
                    e
                ))));
                return;
            }
        };
        if let Some(model) = chunk.model {
            self.model = model;
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }
        if let Some(choice) = chunk.choices.into_iter().next() {
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
            let delta = self.delta_text(choice.delta);
            if !delta.is_empty() {
                self.text.push_str(&delta);
                events.push(Ok(StreamEvent::Delta(delta)));
            }
        }
    }

    fn delta_text(&self, delta: ChunkDelta) -> String {
        let arguments: String = delta
            .tool_calls
            .into_iter()
            .filter_map(|call| call.function.and_then(|function| function.arguments))
            .collect();
        match self.render_mode {
            RenderMode::Tool if !arguments.is_empty() => arguments,
            _ => delta.content.unwrap_or_default(),
        }
    }

    fn complete(&mut self) -> Result<StreamEvent, ApiError> {
        self.done = true;
        if self.text.trim().is_empty() {
            return Err(ApiError::ProviderError(
                "Response contained no output".to_string(),
            ));
        }
        let value = parse_generated_text(self.output_mode, &self.text)?;
        Ok(StreamEvent::Done(GeneratedOutput {
            value: unwrap_envelope(self.output_mode, value),
            response: ResponseMetadata {
                provider: self.provider.clone(),
                model: self.model.clone(),
                usage: self.usage.clone(),
                finish_reason: self.finish_reason.clone(),
                raw: None,
            },
        }))
    }
}

struct SseState {
    body: BoxStream<'static, Result<Vec<u8>, ApiError>>,
    parser: SseParser,
    pending: VecDeque<Result<StreamEvent, ApiError>>,
    ended: bool,
}

fn sse_events(
    body: BoxStream<'static, Result<Vec<u8>, ApiError>>,
    parser: SseParser,
) -> GenerationStream {
    let state = SseState {
        body,
        parser,
        pending: VecDeque::new(),
        ended: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.ended {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => state.pending.extend(state.parser.feed(&bytes)),
                Some(Err(err)) => {
                    state.pending.push_back(Err(err));
                    state.ended = true;
                }
                None => {
                    state.pending.extend(state.parser.finish());
                    state.ended = true;
                }
            }
            if state.parser.is_done() {
                state.ended = true;
            }
        }
    }))
}

/// Gateway client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatibleClient {
    client: Client,
    provider: String,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        provider: &str,
        model: String,
        api_key: Option<String>,
        base_url: String,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
            .timeout(PROVIDER_HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::ProviderError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            provider: provider.to_string(),
            model,
            api_key,
            base_url,
        })
    }

    async fn send(
        &self,
        body: &ChatCompletionRequest,
        request: &GenerationRequest,
    ) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            provider = %self.provider,
            model = %self.model,
            output_mode = request.output_mode.as_str(),
            render_mode = request.render_mode.as_str(),
            stream = body.stream,
            "Sending generation request"
        );

        let mut builder = self.client.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }
        let response = builder.send().await.map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, &error_text));
        }
        Ok(response)
    }
}

#[async_trait]
impl StructuredGenerator for OpenAiCompatibleClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedOutput, ApiError> {
        let body = build_request(&self.model, &request);
        let response = self.send(&body, &request).await?;

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ApiError::ProviderError(format!("Failed to parse response: {}", e)))?;
        let completion: ChatCompletionResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::ProviderError(format!("Unexpected response shape: {}", e)))?;

        let choice = completion
            .choices
            .first()
            .ok_or_else(|| ApiError::ProviderError("No choices in response".to_string()))?;
        let value = extract_value(request.output_mode, request.render_mode, &choice.message)?;

        Ok(GeneratedOutput {
            value,
            response: ResponseMetadata {
                provider: self.provider.clone(),
                model: completion.model,
                usage: completion.usage.map(TokenUsage::from),
                finish_reason: choice.finish_reason.clone(),
                raw: Some(raw),
            },
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<GenerationStream, ApiError> {
        let mut body = build_request(&self.model, &request);
        body.stream = true;
        let response = self.send(&body, &request).await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_http_error))
            .boxed();
        Ok(sse_events(
            bytes,
            SseParser::new(&self.provider, &self.model, &request),
        ))
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
