//! CLI parse: clap types for tamer. No behavior; definitions only.

use crate::types::{OutputMode, RenderMode};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Tamer CLI - batched structured-output transformation
#[derive(Parser, Debug)]
#[command(name = "tamer")]
#[command(about = "Turn records into validated structured output with an LLM backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace directory holding an optional tamer.toml
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (layered above the workspace file)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, default_value = "false")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transform every item of an input file in batches
    Run(RunArgs),
    /// Generate one structured object
    Object(ObjectArgs),
    /// Print the prompts a run would send, without calling a provider
    Prompt(PromptArgs),
    /// Show the effective configuration
    Config {
        /// Output format (toml or table)
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Prompt and schema flags shared by every generating command.
#[derive(Args, Debug, Clone, Default)]
pub struct GenerationArgs {
    /// JSON Schema file describing one output element
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Schema name shown to the backend
    #[arg(long)]
    pub schema_name: Option<String>,

    /// Schema description shown to the backend
    #[arg(long)]
    pub schema_description: Option<String>,

    /// Allowed values for enum output (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub enum_values: Vec<String>,

    /// Output mode (object, array, enum, no-schema)
    #[arg(long)]
    pub mode: Option<OutputMode>,

    /// How structured output is requested (auto, tool, json)
    #[arg(long)]
    pub render: Option<RenderMode>,

    /// System text placed first in the prompt
    #[arg(long)]
    pub system: Option<String>,

    /// Instructions replacing the default transformation directive
    #[arg(long)]
    pub instructions: Option<String>,

    /// JSON file with an array of {"input": ..., "output": ...} examples
    #[arg(long)]
    pub examples: Option<PathBuf>,

    /// Per-item character budget in the prompt
    #[arg(long)]
    pub char_limit: Option<usize>,

    /// Add a "Schema:" line with the schema name and description
    #[arg(long)]
    pub include_schema_description: bool,

    /// Retries after the first failed attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Record that repair is disabled (retries still run)
    #[arg(long)]
    pub no_repair: bool,

    /// Maximum tokens per generation
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0-2.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Log every prompt and raw response on the tamer::debug target
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Input file: a JSON array or JSON lines
    pub input: PathBuf,

    #[command(flatten)]
    pub generation: GenerationArgs,

    /// Items per generation call
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Generation calls in flight at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Append each batch's results to this file as JSON lines as they complete
    #[arg(long)]
    pub sink: Option<PathBuf>,

    /// Report each completed batch on stderr
    #[arg(long)]
    pub progress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ObjectArgs {
    /// Optional input file: a JSON array or JSON lines
    #[arg(long)]
    pub input: Option<PathBuf>,

    #[command(flatten)]
    pub generation: GenerationArgs,

    /// Print provider metadata alongside the data
    #[arg(long)]
    pub with_response: bool,

    /// Echo raw output to stderr as it streams in
    #[arg(long)]
    pub stream: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PromptArgs {
    /// Input file: a JSON array or JSON lines
    pub input: PathBuf,

    #[command(flatten)]
    pub generation: GenerationArgs,

    /// Items per generation call
    #[arg(long)]
    pub batch_size: Option<usize>,
}
