//! CLI input: item files as a JSON array or JSON lines.

use crate::error::ApiError;
use crate::types::InputItem;
use serde_json::Value;
use std::path::Path;

/// Read items from `path`.
pub fn read_items(path: &Path) -> Result<Vec<InputItem>, ApiError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ApiError::ConfigError(format!("Failed to read input {}: {}", path.display(), e))
    })?;
    parse_items(&content)
        .map_err(|e| ApiError::ConfigError(format!("{}: {}", path.display(), e)))
}

/// Parse a JSON array of items, or one JSON value per non-blank line.
///
/// A document that does not parse as one array is read as JSON lines, so a
/// JSONL file may start with an array record. Strings and objects become text
/// and records; other values become text holding their compact JSON.
pub fn parse_items(content: &str) -> Result<Vec<InputItem>, String> {
    if content.trim_start().starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<Value>>(content) {
            return Ok(values.into_iter().map(InputItem::from).collect());
        }
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<Value>(line)
                .map(InputItem::from)
                .map_err(|e| format!("line {}: {}", idx + 1, e))
        })
        .collect()
}
