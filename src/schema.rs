//! Output schema capability
//!
//! A schema hands an opaque [`SchemaDescriptor`] to the generation backend and
//! coerces whatever comes back into the caller's output type. The orchestrator
//! never looks inside the descriptor.

use crate::error::ApiError;
use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;

/// Opaque description of the expected output shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for a single output element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    /// Allowed values in enum mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_json_schema(mut self, json_schema: Value) -> Self {
        self.json_schema = Some(json_schema);
        self
    }

    /// One-line summary used by the prompt assembler, if there is anything to say.
    pub fn summary(&self) -> Option<String> {
        let name = self.name.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match (name, description) {
            (Some(name), Some(description)) => Some(format!("{} - {}", name, description)),
            (Some(name), None) => Some(name.to_string()),
            (None, Some(description)) => Some(description.to_string()),
            (None, None) => None,
        }
    }
}

/// Validate/coerce capability paired with its descriptor.
pub trait OutputSchema: Send + Sync {
    type Output: Send + Sync;

    fn descriptor(&self) -> &SchemaDescriptor;

    /// Turn one raw backend value into a validated output.
    fn coerce(&self, value: Value) -> Result<Self::Output, ApiError>;
}

/// Schema backed by serde deserialization into `T`.
pub struct TypedSchema<T> {
    descriptor: SchemaDescriptor,
    _output: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new(descriptor: SchemaDescriptor) -> Self {
        Self {
            descriptor,
            _output: PhantomData,
        }
    }
}

impl<T> OutputSchema for TypedSchema<T>
where
    T: DeserializeOwned + Send + Sync,
{
    type Output = T;

    fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    fn coerce(&self, value: Value) -> Result<T, ApiError> {
        serde_json::from_value(value).map_err(|e| {
            let name = self.descriptor.name.as_deref().unwrap_or("output");
            ApiError::SchemaValidation(format!("{} does not match schema: {}", name, e))
        })
    }
}

/// Closed set of string values.
#[derive(Debug)]
pub struct EnumSchema {
    descriptor: SchemaDescriptor,
}

impl EnumSchema {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            descriptor: SchemaDescriptor {
                enum_values: values.into_iter().map(Into::into).collect(),
                ..SchemaDescriptor::default()
            },
        }
    }

    pub fn with_descriptor(mut self, descriptor: SchemaDescriptor) -> Self {
        let values = std::mem::take(&mut self.descriptor.enum_values);
        self.descriptor = SchemaDescriptor {
            enum_values: values,
            ..descriptor
        };
        self
    }
}

impl OutputSchema for EnumSchema {
    type Output = String;

    fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    fn coerce(&self, value: Value) -> Result<String, ApiError> {
        let candidate = match value {
            Value::String(s) => s,
            other => {
                return Err(ApiError::SchemaValidation(format!(
                    "expected one of {:?}, got {}",
                    self.descriptor.enum_values, other
                )))
            }
        };
        if self.descriptor.enum_values.iter().any(|v| v == &candidate) {
            Ok(candidate)
        } else {
            Err(ApiError::SchemaValidation(format!(
                "'{}' is not one of {:?}",
                candidate, self.descriptor.enum_values
            )))
        }
    }
}

/// Passthrough schema for unstructured output.
#[derive(Default)]
pub struct RawSchema {
    descriptor: SchemaDescriptor,
}

impl RawSchema {
    pub fn new(descriptor: SchemaDescriptor) -> Self {
        Self { descriptor }
    }
}

impl OutputSchema for RawSchema {
    type Output = Value;

    fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    fn coerce(&self, value: Value) -> Result<Value, ApiError> {
        Ok(value)
    }
}

/// JSON values checked against the descriptor's JSON Schema.
///
/// A mismatch is a [`ApiError::SchemaValidation`], so the retry loop treats it
/// like any other failed generation.
pub struct JsonSchemaSchema {
    descriptor: SchemaDescriptor,
    validator: Validator,
}

impl JsonSchemaSchema {
    /// Compile `descriptor.json_schema`. A missing or invalid schema is a
    /// configuration error.
    pub fn new(descriptor: SchemaDescriptor) -> Result<Self, ApiError> {
        let schema = descriptor.json_schema.as_ref().ok_or_else(|| {
            ApiError::ConfigError("JSON Schema validation requires a schema".to_string())
        })?;
        let validator = Validator::new(schema)
            .map_err(|e| ApiError::ConfigError(format!("Invalid JSON Schema: {}", e)))?;
        Ok(Self {
            descriptor,
            validator,
        })
    }
}

impl OutputSchema for JsonSchemaSchema {
    type Output = Value;

    fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    fn coerce(&self, value: Value) -> Result<Value, ApiError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            return Ok(value);
        }
        let name = self.descriptor.name.as_deref().unwrap_or("output");
        Err(ApiError::SchemaValidation(format!(
            "{} does not match schema: {}",
            name,
            errors.join("; ")
        )))
    }
}
