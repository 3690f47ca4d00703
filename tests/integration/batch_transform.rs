//! Integration tests for the batch transformation operation

use crate::integration::test_utils::{
    echo_items, prompt_items, HeldBackGenerator, RecordingPause, ScriptedGenerator,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tamer::batch::BatchObserver;
use tamer::schema::{EnumSchema, RawSchema, SchemaDescriptor, TypedSchema};
use tamer::types::{BatchReport, InputItem, OutputMode};
use tamer::{transform_batch, ApiError, TransformBatchOptions};
use tokio::sync::Notify;

fn text_items(names: &[&str]) -> Vec<InputItem> {
    names.iter().copied().map(InputItem::from).collect()
}

#[tokio::test]
async fn test_results_flatten_in_batch_order() {
    let generator = ScriptedGenerator::queue(vec![Ok(json!([1, 2])), Ok(json!([3, 4]))]);
    let schema = RawSchema::default();
    let items = text_items(&["a", "b", "c", "d"]);

    let output = transform_batch(
        &generator,
        TransformBatchOptions {
            batch_size: 2,
            concurrency: 1,
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap();

    assert_eq!(output, vec![json!(1), json!(2), json!(3), json!(4)]);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_empty_input_makes_no_calls() {
    let generator = ScriptedGenerator::echo();
    let schema = RawSchema::default();

    let output = transform_batch(&generator, TransformBatchOptions::new(&[], &schema))
        .await
        .unwrap();

    assert!(output.is_empty());
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_zero_batch_size_is_a_config_error() {
    let generator = ScriptedGenerator::echo();
    let schema = RawSchema::default();
    let items = text_items(&["a"]);

    let err = transform_batch(
        &generator,
        TransformBatchOptions {
            batch_size: 0,
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ApiError::ConfigError(_)));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_order_survives_out_of_order_completion() {
    // Batch 0 ("a") is held until batch 1 ("c") has answered.
    let generator = HeldBackGenerator::new("a", 1);
    let schema = RawSchema::default();
    let items = text_items(&["a", "b", "c", "d"]);

    let output = transform_batch(
        &generator,
        TransformBatchOptions {
            batch_size: 2,
            concurrency: 2,
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap();

    assert_eq!(generator.completions(), vec!["c", "a"]);
    assert_eq!(
        output,
        vec![
            json!({"item": "a"}),
            json!({"item": "b"}),
            json!({"item": "c"}),
            json!({"item": "d"}),
        ]
    );
}

#[tokio::test]
async fn test_observer_sees_each_batch_once() {
    let generator = ScriptedGenerator::echo();
    let schema = RawSchema::default();
    let items = text_items(&["a", "b", "c", "d", "e"]);
    let reports: Mutex<Vec<(usize, Vec<InputItem>, Vec<Value>)>> = Mutex::new(Vec::new());
    let observer = |report: &BatchReport<'_, Value>| -> anyhow::Result<()> {
        reports.lock().push((
            report.batch_index,
            report.items.to_vec(),
            report.result.to_vec(),
        ));
        Ok(())
    };

    transform_batch(
        &generator,
        TransformBatchOptions {
            batch_size: 2,
            concurrency: 3,
            observer: Some(&observer as &dyn BatchObserver<Value>),
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap();

    let mut reports = reports.into_inner();
    reports.sort_by_key(|(index, _, _)| *index);
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].0, 0);
    assert_eq!(reports[0].1, text_items(&["a", "b"]));
    assert_eq!(reports[0].2, vec![json!({"item": "a"}), json!({"item": "b"})]);
    assert_eq!(reports[2].1, text_items(&["e"]));
    assert_eq!(reports[2].2, vec![json!({"item": "e"})]);
}

/// Holds the report for batch 0 until the gateway has seen item "c".
struct WaitsForLastBatch {
    last_started: Arc<Notify>,
}

impl BatchObserver<Value> for WaitsForLastBatch {
    fn on_batch_result<'a>(
        &'a self,
        report: BatchReport<'a, Value>,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            if report.batch_index == 0 {
                self.last_started.notified().await;
            }
            Ok(())
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_slow_observer_does_not_hold_back_queued_batches() {
    let last_started = Arc::new(Notify::new());
    let signal = Arc::clone(&last_started);
    let generator = ScriptedGenerator::from_fn(move |request, _| {
        if prompt_items(&request.prompt) == ["c"] {
            signal.notify_one();
        }
        Ok(echo_items(&request.prompt))
    });
    let schema = RawSchema::default();
    let items = text_items(&["a", "b", "c"]);
    let observer = WaitsForLastBatch { last_started };

    let output = tokio::time::timeout(
        Duration::from_secs(5),
        transform_batch(
            &generator,
            TransformBatchOptions {
                batch_size: 1,
                concurrency: 2,
                observer: Some(&observer as &dyn BatchObserver<Value>),
                ..TransformBatchOptions::new(&items, &schema)
            },
        ),
    )
    .await
    .expect("batch 2 should be admitted while batch 0's observer is pending")
    .unwrap();

    assert_eq!(
        output,
        vec![json!({"item": "a"}), json!({"item": "b"}), json!({"item": "c"})]
    );
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn test_failed_attempt_is_retried_once() {
    let generator = ScriptedGenerator::queue(vec![
        Err(ApiError::ProviderRequestFailed("connection reset".to_string())),
        Ok(json!([{"ok": true}])),
    ]);
    let schema = RawSchema::default();
    let pause = RecordingPause::shared();
    let items = text_items(&["a"]);

    let output = transform_batch(
        &generator,
        TransformBatchOptions {
            max_retries: 1,
            repair: true,
            pause: Some(pause.clone()),
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap();

    assert_eq!(output, vec![json!({"ok": true})]);
    assert_eq!(generator.calls(), 2);
    assert_eq!(pause.delays_ms(), vec![1000]);
}

#[tokio::test]
async fn test_exhausted_budget_returns_original_error() {
    let generator =
        ScriptedGenerator::from_fn(|_, _| Err(ApiError::ProviderError("model overloaded".to_string())));
    let schema = RawSchema::default();
    let pause = RecordingPause::shared();
    let items = text_items(&["a", "b"]);

    let err = transform_batch(
        &generator,
        TransformBatchOptions {
            max_retries: 0,
            repair: false,
            pause: Some(pause.clone()),
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Provider error: model overloaded");
    assert_eq!(generator.calls(), 1);
    assert!(pause.delays_ms().is_empty());
}

#[tokio::test]
async fn test_backoff_delays_grow_then_cap() {
    let generator =
        ScriptedGenerator::from_fn(|_, _| Err(ApiError::ProviderRateLimit("429".to_string())));
    let schema = RawSchema::default();
    let pause = RecordingPause::shared();
    let items = text_items(&["a"]);

    let err = transform_batch(
        &generator,
        TransformBatchOptions {
            max_retries: 4,
            pause: Some(pause.clone()),
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ApiError::ProviderRateLimit(_)));
    assert_eq!(generator.calls(), 5);
    assert_eq!(pause.delays_ms(), vec![1000, 2000, 3000, 3000]);
}

#[tokio::test]
async fn test_failing_batch_does_not_stop_siblings() {
    let generator = ScriptedGenerator::from_fn(|request, _| {
        if prompt_items(&request.prompt).first().map(String::as_str) == Some("bad") {
            Err(ApiError::ProviderError("cannot parse".to_string()))
        } else {
            Ok(echo_items(&request.prompt))
        }
    });
    let schema = RawSchema::default();
    let items = text_items(&["bad", "x", "good", "y", "fine", "z"]);
    let completed = Mutex::new(Vec::new());
    let observer = |report: &BatchReport<'_, Value>| -> anyhow::Result<()> {
        completed.lock().push(report.batch_index);
        Ok(())
    };

    let err = transform_batch(
        &generator,
        TransformBatchOptions {
            batch_size: 2,
            concurrency: 1,
            max_retries: 0,
            observer: Some(&observer as &dyn BatchObserver<Value>),
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Provider error: cannot parse");
    assert_eq!(generator.calls(), 3);
    assert_eq!(completed.into_inner(), vec![1, 2]);
}

#[tokio::test]
async fn test_in_flight_calls_never_exceed_concurrency() {
    let generator = ScriptedGenerator::echo();
    let schema = RawSchema::default();
    let items: Vec<InputItem> = (0..40).map(|i| InputItem::from(format!("item-{}", i))).collect();

    let output = transform_batch(
        &generator,
        TransformBatchOptions {
            batch_size: 3,
            concurrency: 3,
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap();

    assert_eq!(output.len(), 40);
    assert_eq!(generator.calls(), 14);
    assert!(generator.peak_in_flight() <= 3);
    assert!(generator.peak_in_flight() >= 2);
}

#[tokio::test]
async fn test_large_input_is_split_into_full_batches() {
    let generator = ScriptedGenerator::echo();
    let schema = RawSchema::default();
    let items: Vec<InputItem> = (0..500).map(|i| InputItem::from(format!("row {}", i))).collect();

    let output = transform_batch(
        &generator,
        TransformBatchOptions {
            batch_size: 50,
            concurrency: 4,
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap();

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 10);
    assert!(prompts.iter().all(|p| p.contains("Inputs (50):")));
    assert_eq!(output[0], json!({"item": "row 0"}));
    assert_eq!(output[499], json!({"item": "row 499"}));
}

#[tokio::test]
async fn test_single_value_answer_counts_as_one_element() {
    let generator = ScriptedGenerator::queue(vec![Ok(json!({"summary": "two rows"}))]);
    let schema = RawSchema::default();
    let items = text_items(&["a", "b"]);

    let output = transform_batch(&generator, TransformBatchOptions::new(&items, &schema))
        .await
        .unwrap();

    assert_eq!(output, vec![json!({"summary": "two rows"})]);
}

#[derive(Debug, Deserialize, PartialEq)]
struct PersonName {
    first_name: String,
    last_name: String,
}

#[tokio::test]
async fn test_typed_schema_validation_failure_is_retried() {
    let generator = ScriptedGenerator::queue(vec![
        Ok(json!([{"first": "Alice"}])),
        Ok(json!([{"first_name": "Alice", "last_name": "Doe"}])),
    ]);
    let schema = TypedSchema::<PersonName>::new(
        SchemaDescriptor::new()
            .with_name("PersonName")
            .with_json_schema(json!({
                "type": "object",
                "properties": {
                    "first_name": {"type": "string"},
                    "last_name": {"type": "string"}
                },
                "required": ["first_name", "last_name"]
            })),
    );
    let pause = RecordingPause::shared();
    let items = text_items(&["Alice Doe"]);

    let people = transform_batch(
        &generator,
        TransformBatchOptions {
            pause: Some(pause.clone()),
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap();

    assert_eq!(
        people,
        vec![PersonName {
            first_name: "Alice".to_string(),
            last_name: "Doe".to_string()
        }]
    );
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_enum_mode_checks_membership() {
    let generator = ScriptedGenerator::queue(vec![Ok(json!("positive")), Ok(json!("angry"))]);
    let schema = EnumSchema::new(["positive", "negative", "neutral"]);
    let items = text_items(&["great product", "terrible support"]);

    let err = transform_batch(
        &generator,
        TransformBatchOptions {
            output_mode: OutputMode::Enum,
            batch_size: 1,
            concurrency: 1,
            max_retries: 0,
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ApiError::SchemaValidation(_)));
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_observer_failure_is_reported_after_all_batches() {
    let generator = ScriptedGenerator::echo();
    let schema = RawSchema::default();
    let items = text_items(&["a", "b", "c"]);
    let seen = Mutex::new(0usize);
    let observer = |report: &BatchReport<'_, Value>| -> anyhow::Result<()> {
        *seen.lock() += 1;
        if report.batch_index == 1 {
            anyhow::bail!("disk full");
        }
        Ok(())
    };

    let err = transform_batch(
        &generator,
        TransformBatchOptions {
            batch_size: 1,
            concurrency: 1,
            observer: Some(&observer as &dyn BatchObserver<Value>),
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Batch 1 result callback failed: disk full");
    assert_eq!(*seen.lock(), 3);
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn test_prompt_carries_context_and_truncation() {
    let generator = ScriptedGenerator::echo();
    let schema = RawSchema::new(
        SchemaDescriptor::new()
            .with_name("Summary")
            .with_description("One line per record"),
    );
    let items = vec![InputItem::from("y".repeat(30))];

    transform_batch(
        &generator,
        TransformBatchOptions {
            prompt_context: Some(tamer::prompt::PromptContext {
                system: Some("You summarize support tickets.".to_string()),
                ..Default::default()
            }),
            prompt_options: tamer::prompt::PromptOptions {
                char_limit_per_item: Some(10),
                include_schema_description: true,
            },
            ..TransformBatchOptions::new(&items, &schema)
        },
    )
    .await
    .unwrap();

    let prompt = &generator.prompts()[0];
    assert!(prompt.starts_with("You summarize support tickets.\n\n"));
    assert!(prompt.contains("Schema: Summary - One line per record"));
    assert!(prompt.contains(&format!("#0: {}…", "y".repeat(9))));
}
