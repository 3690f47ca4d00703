//! CLI route: single route table and run context. Dispatches to the transform API.

use crate::batch::{partition, BatchObserver};
use crate::cli::input::read_items;
use crate::cli::parse::{Commands, GenerationArgs, ObjectArgs, PromptArgs, RunArgs};
use crate::config::{ConfigLoader, TamerConfig};
use crate::error::ApiError;
use crate::prompt::{assemble_batch_prompt, PromptContext, PromptExample, PromptOptions};
use crate::provider::{ProviderFactory, StructuredGenerator};
use crate::schema::{EnumSchema, JsonSchemaSchema, OutputSchema, RawSchema, SchemaDescriptor};
use crate::transform::{
    transform_batch, transform_object, transform_object_stream, ObjectStreamEvent,
    TransformBatchOptions, TransformObjectOptions, TransformedObject,
};
use crate::types::{BatchReport, InputItem, OutputMode};
use anyhow::Context;
use futures::StreamExt;
use owo_colors::OwoColorize;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs::File;
use std::future::Future;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Runtime context for CLI execution: workspace and the effective configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config: TamerConfig,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = ConfigLoader::load_with_file(&workspace_root, config_path.as_deref())?;
        config.ensure_valid()?;
        Ok(Self::from_config(workspace_root, config))
    }

    pub fn from_config(workspace_root: PathBuf, config: TamerConfig) -> Self {
        Self {
            workspace_root,
            config,
        }
    }

    pub fn config(&self) -> &TamerConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Execute a command and return what should be printed on stdout.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Run(args) => block_on(async {
                let generator = ProviderFactory::create_client(&self.config.provider)?;
                self.run_with(generator.as_ref(), args).await
            }),
            Commands::Object(args) => block_on(async {
                let generator = ProviderFactory::create_client(&self.config.provider)?;
                self.object_with(generator.as_ref(), args).await
            }),
            Commands::Prompt(args) => self.handle_prompt(args),
            Commands::Config { format } => self.handle_config(format),
        }
    }

    /// `run` against an explicit gateway.
    pub async fn run_with<G>(&self, generator: &G, args: &RunArgs) -> Result<String, ApiError>
    where
        G: StructuredGenerator + ?Sized,
    {
        let items = read_items(&args.input)?;
        let descriptor = build_descriptor(&args.generation)?;
        let sink = args.sink.as_deref().map(BatchSink::create).transpose()?;

        let values = match args.generation.mode.unwrap_or(OutputMode::Array) {
            OutputMode::Enum => {
                let schema = enum_schema(&args.generation, descriptor)?;
                self.transform_items(generator, &schema, &items, args, sink.as_ref())
                    .await?
            }
            mode if validates_output(mode, &descriptor) => {
                let schema = JsonSchemaSchema::new(descriptor)?;
                self.transform_items(generator, &schema, &items, args, sink.as_ref())
                    .await?
            }
            _ => {
                let schema = RawSchema::new(descriptor);
                self.transform_items(generator, &schema, &items, args, sink.as_ref())
                    .await?
            }
        };

        info!(output_count = values.len(), "Run finished");
        to_pretty_json(&values)
    }

    /// `object` against an explicit gateway.
    pub async fn object_with<G>(&self, generator: &G, args: &ObjectArgs) -> Result<String, ApiError>
    where
        G: StructuredGenerator + ?Sized,
    {
        let items = match &args.input {
            Some(path) => read_items(path)?,
            None => Vec::new(),
        };
        let descriptor = build_descriptor(&args.generation)?;
        let mode = args.generation.mode.unwrap_or(OutputMode::Object);

        let (data, response) = match mode {
            OutputMode::Enum => {
                let schema = enum_schema(&args.generation, descriptor)?;
                self.generate_object(generator, &schema, &items, args).await?
            }
            mode if validates_output(mode, &descriptor) => {
                let schema = JsonSchemaSchema::new(descriptor)?;
                self.generate_object(generator, &schema, &items, args).await?
            }
            _ => {
                let schema = RawSchema::new(descriptor);
                self.generate_object(generator, &schema, &items, args).await?
            }
        };

        if args.with_response {
            to_pretty_json(&json!({ "data": data, "response": response }))
        } else {
            to_pretty_json(&data)
        }
    }

    async fn transform_items<G, S>(
        &self,
        generator: &G,
        schema: &S,
        items: &[InputItem],
        args: &RunArgs,
        sink: Option<&BatchSink>,
    ) -> Result<Vec<Value>, ApiError>
    where
        G: StructuredGenerator + ?Sized,
        S: OutputSchema,
        S::Output: Serialize,
    {
        let batch = &self.config.batch;
        let batch_size = args.batch_size.unwrap_or(batch.batch_size);
        let batch_count = if batch_size == 0 {
            0
        } else {
            items.len().div_ceil(batch_size)
        };
        let progress = args.progress;
        let color = std::io::stderr().is_terminal();

        let observer = move |report: &BatchReport<'_, S::Output>| -> anyhow::Result<()> {
            if let Some(sink) = sink {
                sink.append(report)?;
            }
            if progress {
                let mark = if color {
                    "✓".green().to_string()
                } else {
                    "✓".to_string()
                };
                eprintln!(
                    "{} batch {}/{}: {} items, {} results",
                    mark,
                    report.batch_index + 1,
                    batch_count,
                    report.items.len(),
                    report.result.len()
                );
            }
            Ok(())
        };
        let observer = (sink.is_some() || progress)
            .then_some(&observer as &dyn BatchObserver<S::Output>);

        let generation = &args.generation;
        let outputs = transform_batch(
            generator,
            TransformBatchOptions {
                output_mode: generation.mode.unwrap_or(OutputMode::Array),
                render_mode: generation.render.unwrap_or_default(),
                batch_size,
                concurrency: args.concurrency.unwrap_or(batch.concurrency),
                prompt_context: build_prompt_context(generation)?,
                prompt_options: self.prompt_options(generation),
                max_retries: generation.max_retries.unwrap_or(batch.max_retries),
                repair: batch.repair && !generation.no_repair,
                max_tokens: generation.max_tokens.or(self.config.provider.max_tokens),
                temperature: generation.temperature.or(self.config.provider.temperature),
                observer,
                debug: generation.debug || batch.debug,
                ..TransformBatchOptions::new(items, schema)
            },
        )
        .await?;

        outputs
            .iter()
            .map(|output| serde_json::to_value(output).map_err(ApiError::from))
            .collect()
    }

    async fn generate_object<G, S>(
        &self,
        generator: &G,
        schema: &S,
        items: &[InputItem],
        args: &ObjectArgs,
    ) -> Result<(Value, Value), ApiError>
    where
        G: StructuredGenerator + ?Sized,
        S: OutputSchema,
        S::Output: Serialize,
    {
        let batch = &self.config.batch;
        let generation = &args.generation;
        let options = TransformObjectOptions {
            items,
            output_mode: generation.mode.unwrap_or(OutputMode::Object),
            render_mode: generation.render.unwrap_or_default(),
            prompt_context: build_prompt_context(generation)?,
            prompt_options: self.prompt_options(generation),
            max_retries: generation.max_retries.unwrap_or(batch.max_retries),
            repair: batch.repair && !generation.no_repair,
            max_tokens: generation.max_tokens.or(self.config.provider.max_tokens),
            temperature: generation.temperature.or(self.config.provider.temperature),
            debug: generation.debug || batch.debug,
            ..TransformObjectOptions::new(schema)
        };
        let result = if args.stream {
            stream_object(generator, options).await?
        } else {
            transform_object(generator, options).await?
        };

        Ok((
            serde_json::to_value(&result.data)?,
            serde_json::to_value(&result.response)?,
        ))
    }

    fn handle_prompt(&self, args: &PromptArgs) -> Result<String, ApiError> {
        let items = read_items(&args.input)?;
        let descriptor = build_descriptor(&args.generation)?;
        let context = build_prompt_context(&args.generation)?;
        let options = self.prompt_options(&args.generation);
        let batch_size = args.batch_size.unwrap_or(self.config.batch.batch_size);

        let sections: Vec<String> = partition(&items, batch_size)?
            .iter()
            .map(|batch| {
                format!(
                    "=== batch {} ({} items) ===\n{}",
                    batch.index,
                    batch.len(),
                    assemble_batch_prompt(
                        batch.items,
                        context.as_ref(),
                        &options,
                        Some(&descriptor)
                    )
                )
            })
            .collect();
        Ok(sections.join("\n\n"))
    }

    fn handle_config(&self, format: &str) -> Result<String, ApiError> {
        let mut shown = self.config.clone();
        if shown.provider.api_key.is_some() {
            shown.provider.api_key = Some("********".to_string());
        }

        match format {
            "toml" => toml::to_string_pretty(&shown)
                .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e))),
            "table" => Ok(config_table(&shown)),
            other => Err(ApiError::ConfigError(format!(
                "Invalid config format: {} (must be 'toml' or 'table')",
                other
            ))),
        }
    }

    fn prompt_options(&self, args: &GenerationArgs) -> PromptOptions {
        let defaults = self.config.batch.prompt_options();
        PromptOptions {
            char_limit_per_item: args.char_limit.or(defaults.char_limit_per_item),
            include_schema_description: args.include_schema_description
                || defaults.include_schema_description,
        }
    }
}

/// Run the streaming operation, echoing raw output on stderr.
async fn stream_object<G, S>(
    generator: &G,
    options: TransformObjectOptions<'_, S>,
) -> Result<TransformedObject<S::Output>, ApiError>
where
    G: StructuredGenerator + ?Sized,
    S: OutputSchema,
{
    let mut events = transform_object_stream(generator, options).await?;
    while let Some(event) = events.next().await {
        match event? {
            ObjectStreamEvent::Delta(text) => eprint!("{}", text),
            ObjectStreamEvent::Done(object) => {
                eprintln!();
                return Ok(object);
            }
        }
    }
    Err(ApiError::ProviderError("Stream ended without a result".to_string()))
}

fn block_on<F>(future: F) -> Result<String, ApiError>
where
    F: Future<Output = Result<String, ApiError>>,
{
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| ApiError::ConfigError(format!("Failed to create async runtime: {}", e)))?;
    runtime.block_on(future)
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, ApiError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn read_json_file(path: &Path) -> Result<Value, ApiError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ApiError::ConfigError(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| ApiError::ConfigError(format!("Invalid JSON in {}: {}", path.display(), e)))
}

fn build_descriptor(args: &GenerationArgs) -> Result<SchemaDescriptor, ApiError> {
    let mut descriptor = SchemaDescriptor::new();
    if let Some(path) = &args.schema {
        descriptor = descriptor.with_json_schema(read_json_file(path)?);
    }
    if let Some(name) = &args.schema_name {
        descriptor = descriptor.with_name(name.clone());
    }
    if let Some(description) = &args.schema_description {
        descriptor = descriptor.with_description(description.clone());
    }
    Ok(descriptor)
}

/// Object and array output is checked against `--schema` when one is given.
fn validates_output(mode: OutputMode, descriptor: &SchemaDescriptor) -> bool {
    matches!(mode, OutputMode::Object | OutputMode::Array) && descriptor.json_schema.is_some()
}

fn enum_schema(args: &GenerationArgs, descriptor: SchemaDescriptor) -> Result<EnumSchema, ApiError> {
    let values: Vec<&str> = args
        .enum_values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(ApiError::ConfigError(
            "Enum mode requires --enum-values".to_string(),
        ));
    }
    Ok(EnumSchema::new(values).with_descriptor(descriptor))
}

fn build_prompt_context(args: &GenerationArgs) -> Result<Option<PromptContext>, ApiError> {
    let examples: Vec<PromptExample> = match &args.examples {
        Some(path) => serde_json::from_value(read_json_file(path)?).map_err(|e| {
            ApiError::ConfigError(format!("Invalid examples in {}: {}", path.display(), e))
        })?,
        None => Vec::new(),
    };
    if args.system.is_none() && args.instructions.is_none() && examples.is_empty() {
        return Ok(None);
    }
    Ok(Some(PromptContext {
        system: args.system.clone(),
        instructions: args.instructions.clone(),
        examples,
    }))
}

fn config_table(config: &TamerConfig) -> String {
    use comfy_table::Table;
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Key", "Value"]);

    let provider = &config.provider;
    let endpoint = provider
        .resolve_endpoint()
        .unwrap_or_else(|_| "-".to_string());
    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    let rows: Vec<(&str, String)> = vec![
        ("provider.type", provider.provider_type.as_str().to_string()),
        ("provider.model", provider.model.clone()),
        ("provider.endpoint", endpoint),
        (
            "provider.api_key",
            if provider.resolve_api_key().is_some() {
                "set".to_string()
            } else {
                "unset".to_string()
            },
        ),
        ("provider.temperature", optional(provider.temperature.map(|t| t.to_string()))),
        ("provider.max_tokens", optional(provider.max_tokens.map(|t| t.to_string()))),
        ("batch.batch_size", config.batch.batch_size.to_string()),
        ("batch.concurrency", config.batch.concurrency.to_string()),
        ("batch.max_retries", config.batch.max_retries.to_string()),
        ("batch.repair", config.batch.repair.to_string()),
        (
            "batch.char_limit_per_item",
            optional(config.batch.char_limit_per_item.map(|c| c.to_string())),
        ),
        ("batch.debug", config.batch.debug.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", config.logging.format.clone()),
        ("logging.output", config.logging.output.clone()),
    ];
    for (key, value) in rows {
        table.add_row(vec![key.to_string(), value]);
    }
    table.to_string()
}

/// Observer sink appending every batch's results as JSON lines.
struct BatchSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl BatchSink {
    fn create(path: &Path) -> Result<Self, ApiError> {
        let file = File::create(path).map_err(|e| {
            ApiError::ConfigError(format!("Failed to create sink {}: {}", path.display(), e))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    fn append<T: Serialize>(&self, report: &BatchReport<'_, T>) -> anyhow::Result<()> {
        let mut file = self.file.lock();
        for value in report.result {
            serde_json::to_writer(&mut *file, value).with_context(|| {
                format!("Failed to encode a result of batch {}", report.batch_index)
            })?;
            writeln!(file)?;
        }
        file.flush().with_context(|| {
            format!(
                "Failed to write batch {} to {}",
                report.batch_index,
                self.path.display()
            )
        })
    }
}
