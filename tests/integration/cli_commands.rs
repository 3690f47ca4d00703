//! Integration tests for CLI command routing

use crate::integration::test_utils::{ScriptedGenerator, StreamingGenerator};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use tamer::cli::{Cli, Commands, RunContext};
use tamer::config::TamerConfig;
use tamer::ApiError;
use tempfile::TempDir;

fn context(dir: &TempDir) -> RunContext {
    RunContext::from_config(dir.path().to_path_buf(), TamerConfig::default())
}

fn write_input(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn parse(args: &[&str]) -> Commands {
    Cli::try_parse_from(args).unwrap().command
}

#[tokio::test]
async fn test_run_reads_jsonl_and_writes_sink() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "items.jsonl", "\"alpha\"\n{\"id\": 2}\n\"gamma\"\n");
    let sink = dir.path().join("out.jsonl");
    let ctx = context(&dir);

    let command = parse(&[
        "tamer",
        "run",
        input.to_str().unwrap(),
        "--batch-size",
        "2",
        "--sink",
        sink.to_str().unwrap(),
    ]);
    let args = match command {
        Commands::Run(args) => args,
        other => panic!("expected run, got {:?}", other),
    };

    let generator = ScriptedGenerator::echo();
    let output = ctx.run_with(&generator, &args).await.unwrap();
    let values: Vec<Value> = serde_json::from_str(&output).unwrap();
    assert_eq!(
        values,
        vec![
            json!({"item": "alpha"}),
            json!({"item": "{\"id\":2}"}),
            json!({"item": "gamma"}),
        ]
    );
    assert_eq!(generator.calls(), 2);

    let sunk = std::fs::read_to_string(&sink).unwrap();
    assert_eq!(sunk.lines().count(), 3);
}

#[tokio::test]
async fn test_run_enum_mode_requires_values() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "items.json", "[\"good\"]");
    let ctx = context(&dir);
    let args = match parse(&["tamer", "run", input.to_str().unwrap(), "--mode", "enum"]) {
        Commands::Run(args) => args,
        other => panic!("expected run, got {:?}", other),
    };

    let generator = ScriptedGenerator::echo();
    let err = ctx.run_with(&generator, &args).await.unwrap_err();
    assert!(err.to_string().contains("--enum-values"));
    assert_eq!(generator.calls(), 0);
}

const NAME_SCHEMA: &str = r#"{
    "type": "object",
    "properties": {"name": {"type": "string"}},
    "required": ["name"]
}"#;

#[tokio::test(start_paused = true)]
async fn test_run_retries_output_that_breaks_the_schema() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "items.json", "[\"Ava\"]");
    let schema = write_input(&dir, "schema.json", NAME_SCHEMA);
    let ctx = context(&dir);
    let args = match parse(&[
        "tamer",
        "run",
        input.to_str().unwrap(),
        "--schema",
        schema.to_str().unwrap(),
    ]) {
        Commands::Run(args) => args,
        other => panic!("expected run, got {:?}", other),
    };

    let generator = ScriptedGenerator::queue(vec![
        Ok(json!([{"name": 5}])),
        Ok(json!([{"name": "Ava"}])),
    ]);
    let output = ctx.run_with(&generator, &args).await.unwrap();
    let values: Vec<Value> = serde_json::from_str(&output).unwrap();
    assert_eq!(values, vec![json!({"name": "Ava"})]);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_object_surfaces_schema_mismatch() {
    let dir = TempDir::new().unwrap();
    let schema = write_input(&dir, "schema.json", NAME_SCHEMA);
    let ctx = context(&dir);
    let args = match parse(&[
        "tamer",
        "object",
        "--instructions",
        "Name someone.",
        "--schema",
        schema.to_str().unwrap(),
        "--max-retries",
        "0",
    ]) {
        Commands::Object(args) => args,
        other => panic!("expected object, got {:?}", other),
    };

    let generator = ScriptedGenerator::queue(vec![Ok(json!({"nickname": "Ava"}))]);
    let err = ctx.object_with(&generator, &args).await.unwrap_err();
    assert!(matches!(err, ApiError::SchemaValidation(_)), "{:?}", err);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_object_with_response_metadata() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let args = match parse(&[
        "tamer",
        "object",
        "--instructions",
        "Return a config object.",
        "--with-response",
    ]) {
        Commands::Object(args) => args,
        other => panic!("expected object, got {:?}", other),
    };

    let generator = ScriptedGenerator::queue(vec![Ok(json!({"retries": 2}))]);
    let output = ctx.object_with(&generator, &args).await.unwrap();
    let value: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["data"], json!({"retries": 2}));
    assert_eq!(value["response"]["provider"], json!("scripted"));
}

#[test]
fn test_prompt_command_prints_every_batch() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "items.json", "[\"a\", \"b\", \"c\"]");
    let ctx = context(&dir);
    let command = parse(&[
        "tamer",
        "prompt",
        input.to_str().unwrap(),
        "--batch-size",
        "2",
        "--system",
        "Classify.",
    ]);

    let output = ctx.execute(&command).unwrap();
    assert!(output.starts_with("=== batch 0 (2 items) ===\nClassify.\n\n"));
    assert!(output.contains("=== batch 1 (1 items) ===\nClassify."));
    assert!(output.contains("Inputs (1):\n#0: c"));
}

#[test]
fn test_config_command_renders_toml() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let output = ctx.execute(&parse(&["tamer", "config"])).unwrap();
    let parsed: TamerConfig = toml::from_str(&output).unwrap();
    assert_eq!(parsed.batch, TamerConfig::default().batch);
}

#[tokio::test]
async fn test_object_stream_flag_uses_the_streaming_gateway() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let args = match parse(&[
        "tamer",
        "object",
        "--instructions",
        "Return a config object.",
        "--stream",
    ]) {
        Commands::Object(args) => args,
        other => panic!("expected object, got {:?}", other),
    };

    let generator = StreamingGenerator::new(r#"{"retries":2}"#, 3);
    let output = ctx.object_with(&generator, &args).await.unwrap();
    let value: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value, json!({"retries": 2}));
    assert_eq!(generator.opened(), 1);
}
