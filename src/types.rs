//! Core data types shared by the prompt, batch and transform layers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One input record: free text or a key/value mapping.
///
/// Items are opaque to the orchestrator and identified only by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputItem {
    Text(String),
    Record(Map<String, Value>),
}

impl From<&str> for InputItem {
    fn from(text: &str) -> Self {
        InputItem::Text(text.to_string())
    }
}

impl From<String> for InputItem {
    fn from(text: String) -> Self {
        InputItem::Text(text)
    }
}

impl From<Map<String, Value>> for InputItem {
    fn from(record: Map<String, Value>) -> Self {
        InputItem::Record(record)
    }
}

impl From<Value> for InputItem {
    /// Strings and objects map directly; any other JSON value becomes text
    /// holding its compact rendering.
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => InputItem::Text(text),
            Value::Object(record) => InputItem::Record(record),
            other => InputItem::Text(other.to_string()),
        }
    }
}

/// Expected cardinality of a generation result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// A single object.
    Object,
    /// One object per input item.
    #[default]
    Array,
    /// One value out of a closed set.
    Enum,
    /// Whatever the backend produces.
    NoSchema,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputMode::Object => "object",
            OutputMode::Array => "array",
            OutputMode::Enum => "enum",
            OutputMode::NoSchema => "no-schema",
        }
    }
}

impl std::str::FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "object" => Ok(OutputMode::Object),
            "array" => Ok(OutputMode::Array),
            "enum" => Ok(OutputMode::Enum),
            "no-schema" => Ok(OutputMode::NoSchema),
            other => Err(format!(
                "unknown output mode '{}' (expected object, array, enum or no-schema)",
                other
            )),
        }
    }
}

/// How the backend is asked to produce structured output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Auto,
    Tool,
    #[default]
    Json,
}

impl RenderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::Auto => "auto",
            RenderMode::Tool => "tool",
            RenderMode::Json => "json",
        }
    }
}

impl std::str::FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(RenderMode::Auto),
            "tool" => Ok(RenderMode::Tool),
            "json" => Ok(RenderMode::Json),
            other => Err(format!(
                "unknown render mode '{}' (expected auto, tool or json)",
                other
            )),
        }
    }
}

/// A contiguous slice of the input processed by one generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch<'a> {
    /// 0-based position in creation order
    pub index: usize,
    pub items: &'a [InputItem],
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What a successful batch produced, handed to the result observer.
#[derive(Debug)]
pub struct BatchReport<'a, T> {
    pub batch_index: usize,
    pub items: &'a [InputItem],
    pub result: &'a [T],
}
