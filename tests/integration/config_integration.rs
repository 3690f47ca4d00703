//! Integration tests for Configuration System

use crate::integration::test_utils::with_xdg_env;
use tamer::config::{ConfigLoader, ProviderType, TamerConfig, WORKSPACE_CONFIG_FILE};
use tamer::provider::ProviderFactory;
use tamer::ApiError;
use tempfile::TempDir;

#[test]
fn test_config_builds_ollama_client() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("tamer.toml");
    std::fs::write(
        &config_file,
        r#"
[provider]
type = "ollama"
model = "llama3.1"

[batch]
batch_size = 20
concurrency = 4
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.batch.settings().batch_size, 20);

    let client = ProviderFactory::create_client(&config.provider).unwrap();
    assert_eq!(client.provider_name(), "ollama");
    assert_eq!(client.model_name(), "llama3.1");
}

#[test]
fn test_local_provider_without_endpoint_fails_validation() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("tamer.toml");
    std::fs::write(&config_file, "[provider]\ntype = \"local\"\nmodel = \"qwen\"\n").unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    let err = config.ensure_valid().unwrap_err();
    assert!(err.to_string().contains("Local provider requires an endpoint"));
}

#[test]
fn test_workspace_file_overrides_global_file() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        let global_dir = test_dir.path().join("tamer");
        std::fs::create_dir_all(&global_dir).unwrap();
        std::fs::write(
            global_dir.join("config.toml"),
            "[provider]\ntype = \"ollama\"\nmodel = \"global\"\n\n[batch]\nmax_retries = 3\n",
        )
        .unwrap();

        let workspace = test_dir.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();
        std::fs::write(
            workspace.join(WORKSPACE_CONFIG_FILE),
            "[provider]\nmodel = \"workspace\"\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&workspace).unwrap();
        assert_eq!(config.provider.provider_type, ProviderType::Ollama);
        assert_eq!(config.provider.model, "workspace");
        assert_eq!(config.batch.max_retries, 3);
    });
}

#[test]
fn test_defaults_without_any_file() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        let workspace = test_dir.path().join("empty");
        std::fs::create_dir_all(&workspace).unwrap();
        let config = ConfigLoader::load(&workspace).unwrap();
        assert_eq!(config, TamerConfig::default());
    });
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("broken.toml");
    std::fs::write(&config_file, "[batch\nbatch_size = ").unwrap();

    let err = ConfigLoader::load_from_file(&config_file).unwrap_err();
    assert!(matches!(err, ApiError::ConfigError(_)));
}
