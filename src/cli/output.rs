//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::ApiError;
use owo_colors::OwoColorize;

/// Map domain errors to a string for CLI output, with a hint where one helps.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::ProviderNotConfigured(_) | ApiError::ProviderAuthFailed(_) => format!(
            "{}\nhint: set provider.api_key in tamer.toml or export OPENAI_API_KEY",
            e
        ),
        ApiError::ProviderModelNotFound(_) => {
            format!("{}\nhint: check provider.model against the backend", e)
        }
        _ => e.to_string(),
    }
}

/// [`map_error`] with an `error:` prefix, colored when `color` is set.
pub fn render_error(e: &ApiError, color: bool) -> String {
    let message = map_error(e);
    if color {
        format!("{} {}", "error:".red().bold(), message)
    } else {
        format!("error: {}", message)
    }
}
