//! Generation gateway abstraction
//!
//! The orchestrator only sees [`StructuredGenerator`]: given a prompt and an
//! opaque schema descriptor it returns a JSON value (or array of values) plus
//! response metadata, or a provider error. Concrete backends live in
//! submodules; [`ProviderFactory`] builds one from a [`ProviderConfig`].

use crate::error::ApiError;
use crate::schema::SchemaDescriptor;
use crate::types::{OutputMode, RenderMode};
use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;

pub mod openai;

pub use openai::OpenAiCompatibleClient;

/// Options forwarded to the backend untouched by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// 0.0-2.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Provider-specific request fields, merged into the request body
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_options: Map<String, Value>,
}

/// One call to the gateway.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub schema: SchemaDescriptor,
    pub output_mode: OutputMode,
    pub render_mode: RenderMode,
    pub options: GenerationOptions,
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Backend metadata attached to a generated value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Raw response body, when the backend keeps it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// Successful gateway result.
#[derive(Debug, Clone)]
pub struct GeneratedOutput {
    /// A single value or an array of values
    pub value: Value,
    pub response: ResponseMetadata,
}

/// One step of a streamed generation.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Output text received since the previous event
    Delta(String),
    /// The finished value, parsed the same way as [`StructuredGenerator::generate`]
    Done(GeneratedOutput),
}

/// Streaming generation type
pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ApiError>> + Send>>;

/// Text-to-structured-data generation capability.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Generate output for `request.prompt` shaped by `request.schema`.
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedOutput, ApiError>;

    /// Generate a streaming answer that ends with [`StreamEvent::Done`].
    ///
    /// Backends without incremental output wait for [`generate`](Self::generate)
    /// and emit its result as the only event.
    async fn stream(&self, request: GenerationRequest) -> Result<GenerationStream, ApiError> {
        let output = self.generate(request).await?;
        Ok(Box::pin(stream::iter([Ok(StreamEvent::Done(output))])))
    }

    /// Get the provider name
    fn provider_name(&self) -> &str;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Supported backend flavours. All speak the OpenAI chat-completions protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    OpenAI,
    Ollama,
    /// Any OpenAI-compatible server; requires an endpoint
    Local,
}

impl ProviderType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Ollama => "ollama",
            ProviderType::Local => "local",
        }
    }

    fn default_endpoint(self) -> Option<&'static str> {
        match self {
            ProviderType::OpenAI => Some("https://api.openai.com/v1"),
            ProviderType::Ollama => Some("http://localhost:11434/v1"),
            ProviderType::Local => None,
        }
    }
}

/// Provider section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type", default)]
    pub provider_type: ProviderType,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::default(),
            model: default_model(),
            api_key: None,
            endpoint: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ProviderConfig {
    /// Validate provider configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Invalid endpoint URL: {}", endpoint));
            }
        }
        if self.provider_type == ProviderType::Local && self.endpoint.is_none() {
            return Err("Local provider requires an endpoint".to_string());
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(format!(
                    "Temperature must be between 0.0 and 2.0, got {}",
                    temperature
                ));
            }
        }
        Ok(())
    }

    /// Configured key, falling back to `OPENAI_API_KEY` for OpenAI.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| match self.provider_type {
            ProviderType::OpenAI => std::env::var("OPENAI_API_KEY").ok(),
            _ => None,
        })
    }

    pub fn resolve_endpoint(&self) -> Result<String, ApiError> {
        self.endpoint
            .clone()
            .or_else(|| self.provider_type.default_endpoint().map(str::to_string))
            .map(|endpoint| endpoint.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                ApiError::ConfigError(format!(
                    "Provider '{}' requires an endpoint",
                    self.provider_type.as_str()
                ))
            })
    }

    /// Default generation options from the configured temperature and token cap.
    pub fn default_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            provider_options: Map::new(),
        }
    }
}

/// Builds gateway clients from configuration.
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_client(config: &ProviderConfig) -> Result<Box<dyn StructuredGenerator>, ApiError> {
        config.validate().map_err(ApiError::ConfigError)?;
        let api_key = config.resolve_api_key();
        if config.provider_type == ProviderType::OpenAI && api_key.is_none() {
            return Err(ApiError::ProviderNotConfigured(
                "OpenAI provider requires an api key (provider.api_key or OPENAI_API_KEY)"
                    .to_string(),
            ));
        }
        let client = OpenAiCompatibleClient::new(
            config.provider_type.as_str(),
            config.model.clone(),
            api_key,
            config.resolve_endpoint()?,
        )?;
        Ok(Box::new(client))
    }
}
