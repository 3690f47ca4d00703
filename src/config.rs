//! Configuration System
//!
//! Layered configuration: built-in defaults, the global config file, the
//! workspace `tamer.toml`, an explicit file and finally `TAMER__*`
//! environment variables. Validation collects every problem instead of
//! stopping at the first.

use crate::batch::{BatchSettings, RetryPolicy, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY};
use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::prompt::PromptOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use crate::provider::{ProviderConfig, ProviderType};

mod merge;
mod sources;

pub use merge::merge_policy::{ENV_PREFIX, ENV_SEPARATOR};
pub use sources::global_file::global_config_path;
pub use sources::workspace_file::{workspace_config_path, WORKSPACE_CONFIG_FILE};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TamerConfig {
    /// Generation backend
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Batching, retry and prompt defaults
    #[serde(default)]
    pub batch: BatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Batch defaults applied by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub repair: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_limit_per_item: Option<usize>,
    #[serde(default)]
    pub include_schema_description: bool,
    /// Dump prompts and raw responses
    #[serde(default)]
    pub debug: bool,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_retries() -> u32 {
    RetryPolicy::default().max_retries
}

fn default_true() -> bool {
    true
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            repair: true,
            char_limit_per_item: None,
            include_schema_description: false,
            debug: false,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                repair: self.repair,
            },
        }
    }

    pub fn prompt_options(&self) -> PromptOptions {
        PromptOptions {
            char_limit_per_item: self.char_limit_per_item,
            include_schema_description: self.include_schema_description,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Provider(String),
    Batch(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Batch(msg) => write!(f, "Batch: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl TamerConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.provider.validate() {
            errors.push(ValidationError::Provider(e));
        }
        if let Err(e) = self.batch.validate() {
            errors.push(ValidationError::Batch(e));
        }
        if !["json", "text"].contains(&self.logging.format.as_str()) {
            errors.push(ValidationError::Logging(format!(
                "format must be 'json' or 'text', got '{}'",
                self.logging.format
            )));
        }
        if !["stdout", "stderr", "file"].contains(&self.logging.output.as_str()) {
            errors.push(ValidationError::Logging(format!(
                "output must be 'stdout', 'stderr' or 'file', got '{}'",
                self.logging.output
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold every problem into one configuration error.
    pub fn ensure_valid(&self) -> Result<(), ApiError> {
        self.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })
    }
}

/// Builds a [`TamerConfig`] from the configured sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for `workspace_root`: defaults, global file,
    /// workspace file, environment.
    pub fn load(workspace_root: &Path) -> Result<TamerConfig, ApiError> {
        Self::load_with_file(workspace_root, None)
    }

    /// Like [`ConfigLoader::load`] with an explicit file layered above the
    /// workspace file. The explicit file must exist.
    pub fn load_with_file(
        workspace_root: &Path,
        explicit: Option<&Path>,
    ) -> Result<TamerConfig, ApiError> {
        let mut builder = merge::merge_policy::builder_with_defaults()?;
        builder = sources::global_file::add_to_builder(builder)?;
        builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ApiError::ConfigError(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            debug!(config_path = %path.display(), "Loading explicit configuration");
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).format(config::FileFormat::Toml),
            );
        }
        builder = merge::merge_policy::add_environment(builder);

        let config: TamerConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load a single file over the built-in defaults, without other layers.
    pub fn load_from_file(path: &Path) -> Result<TamerConfig, ApiError> {
        let config: TamerConfig = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path.to_path_buf()).format(config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_config_path()
    }
}
