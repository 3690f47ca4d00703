//! Prompt assembly
//!
//! Pure helpers that turn input items plus optional system text, instructions
//! and examples into a single prompt string. Sections are joined by a blank
//! line and left out when absent.

use crate::schema::SchemaDescriptor;
use crate::types::InputItem;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a data transformation engine. Produce strictly valid JSON. No commentary.";
pub const BATCH_DIRECTIVE: &str =
    "Output: For each input, return a corresponding JSON element in order. No extra text.";
pub const SINGLE_DIRECTIVE: &str = "Output: Return a single JSON object only.";
pub const TRUNCATION_MARKER: char = '…';

/// One worked example shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptExample {
    pub input: InputItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Caller-supplied prompt text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<PromptExample>,
}

/// Rendering knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptOptions {
    /// Per-item character budget; `None` or 0 disables truncation
    #[serde(default)]
    pub char_limit_per_item: Option<usize>,
    /// Add a `Schema:` line from the descriptor's name and description
    #[serde(default)]
    pub include_schema_description: bool,
}

/// Cut `text` to `limit` characters, the last one being the truncation marker.
pub fn truncate(text: &str, limit: Option<usize>) -> String {
    let limit = match limit {
        Some(limit) if limit > 0 => limit,
        _ => return text.to_string(),
    };
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit - 1).collect();
    out.push(TRUNCATION_MARKER);
    out
}

/// Render an item the way it appears in the prompt.
pub fn render_item(item: &InputItem, limit: Option<usize>) -> String {
    let rendered = match item {
        InputItem::Text(text) => text.clone(),
        InputItem::Record(record) => {
            serde_json::to_string(record).unwrap_or_else(|_| format!("{:?}", record))
        }
    };
    truncate(&rendered, limit)
}

fn system_section(context: Option<&PromptContext>) -> Option<String> {
    context
        .and_then(|c| c.system.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn instructions_section(context: Option<&PromptContext>) -> String {
    context
        .and_then(|c| c.instructions.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_INSTRUCTIONS)
        .to_string()
}

fn schema_section(options: &PromptOptions, schema: Option<&SchemaDescriptor>) -> Option<String> {
    if !options.include_schema_description {
        return None;
    }
    schema
        .and_then(SchemaDescriptor::summary)
        .map(|summary| format!("Schema: {}", summary))
}

fn examples_section(context: Option<&PromptContext>, limit: Option<usize>) -> Option<String> {
    let examples = context.map(|c| c.examples.as_slice()).unwrap_or_default();
    if examples.is_empty() {
        return None;
    }
    let mut lines = Vec::with_capacity(examples.len() * 2);
    for example in examples {
        lines.push(format!("- input: {}", render_item(&example.input, limit)));
        if let Some(output) = &example.output {
            let rendered = serde_json::to_string(output)
                .unwrap_or_else(|_| "[unserializable]".to_string());
            lines.push(format!("  output: {}", rendered));
        }
    }
    Some(format!("Examples (compact):\n{}", lines.join("\n")))
}

fn items_section(items: &[InputItem], limit: Option<usize>) -> String {
    let lines: Vec<String> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| format!("#{}: {}", idx, render_item(item, limit)))
        .collect();
    format!("Inputs ({}):\n{}", items.len(), lines.join("\n"))
}

fn leading_sections(
    context: Option<&PromptContext>,
    options: &PromptOptions,
    schema: Option<&SchemaDescriptor>,
) -> Vec<String> {
    let mut parts = Vec::new();
    if let Some(system) = system_section(context) {
        parts.push(system);
    }
    parts.push(instructions_section(context));
    if let Some(schema) = schema_section(options, schema) {
        parts.push(schema);
    }
    if let Some(examples) = examples_section(context, options.char_limit_per_item) {
        parts.push(examples);
    }
    parts
}

/// Prompt asking for one output element per item, in order.
pub fn assemble_batch_prompt(
    items: &[InputItem],
    context: Option<&PromptContext>,
    options: &PromptOptions,
    schema: Option<&SchemaDescriptor>,
) -> String {
    let mut parts = leading_sections(context, options, schema);
    parts.push(items_section(items, options.char_limit_per_item));
    parts.push(BATCH_DIRECTIVE.to_string());
    parts.join("\n\n")
}

/// Prompt asking for exactly one JSON object, without an items block.
pub fn assemble_single_prompt(
    context: Option<&PromptContext>,
    options: &PromptOptions,
    schema: Option<&SchemaDescriptor>,
) -> String {
    let mut parts = leading_sections(context, options, schema);
    parts.push(SINGLE_DIRECTIVE.to_string());
    parts.join("\n\n")
}
