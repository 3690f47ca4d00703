//! Merge rules: built-in defaults and the environment override layer.

use crate::batch::{DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};

/// Prefix for environment overrides, e.g. `TAMER__BATCH__CONCURRENCY=4`.
pub const ENV_PREFIX: &str = "TAMER";
pub const ENV_SEPARATOR: &str = "__";

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("provider.type", "openai")?
        .set_default("provider.model", "gpt-4o-mini")?
        .set_default("batch.batch_size", DEFAULT_BATCH_SIZE as i64)?
        .set_default("batch.concurrency", DEFAULT_CONCURRENCY as i64)?
        .set_default("batch.max_retries", 1i64)?
        .set_default("batch.repair", true)
}

/// Environment layer, applied last so it wins over every file.
pub fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    )
}
