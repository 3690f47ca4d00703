//! Batch orchestration: partition, bounded dispatch, per-batch retry, slot
//! assignment and ordered flattening.

use crate::batch::assemble::ResultSlots;
use crate::batch::limiter::{AdmissionGate, ConcurrencyGate};
use crate::batch::partition::{partition, DEFAULT_BATCH_SIZE};
use crate::batch::retry::{Pause, RetryController, RetryPolicy, TokioPause};
use crate::error::ApiError;
use crate::prompt::{assemble_batch_prompt, PromptContext, PromptOptions};
use crate::provider::{
    GeneratedOutput, GenerationOptions, GenerationRequest, ResponseMetadata, StructuredGenerator,
};
use crate::schema::OutputSchema;
use crate::types::{Batch, BatchReport, InputItem, OutputMode, RenderMode};
use futures::future::{self, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Tracing target for prompt and response dumps when debug output is requested.
pub const DEBUG_TARGET: &str = "tamer::debug";

pub const DEFAULT_CONCURRENCY: usize = 2;

/// Hook awaited once per successful batch, after its result is recorded.
pub trait BatchObserver<T>: Send + Sync {
    fn on_batch_result<'a>(&'a self, report: BatchReport<'a, T>)
        -> BoxFuture<'a, anyhow::Result<()>>;
}

impl<T, F> BatchObserver<T> for F
where
    F: Fn(&BatchReport<'_, T>) -> anyhow::Result<()> + Send + Sync,
    T: Sync,
{
    fn on_batch_result<'a>(
        &'a self,
        report: BatchReport<'a, T>,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        future::ready(self(&report)).boxed()
    }
}

/// Sizing and retry settings for one orchestration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything about a gateway call that is the same for every batch.
#[derive(Debug, Clone, Default)]
pub struct RequestTemplate {
    pub output_mode: OutputMode,
    pub render_mode: RenderMode,
    pub prompt_context: Option<PromptContext>,
    pub prompt_options: PromptOptions,
    pub options: GenerationOptions,
    /// Dump prompts and raw responses on [`DEBUG_TARGET`]
    pub debug: bool,
}

/// Treat a single value as a one-element batch result.
pub fn normalize_cardinality(value: Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values,
        other => vec![other],
    }
}

pub(crate) fn log_debug_response(batch_index: Option<usize>, response: &ResponseMetadata) {
    match serde_json::to_string(response) {
        Ok(rendered) => debug!(
            target: DEBUG_TARGET,
            batch_index = ?batch_index,
            response = %rendered,
            "LLM response"
        ),
        Err(_) => debug!(
            target: DEBUG_TARGET,
            batch_index = ?batch_index,
            "LLM response (unserializable)"
        ),
    }
}

async fn generate_batch<G, S>(
    generator: &G,
    schema: &S,
    batch: Batch<'_>,
    template: &RequestTemplate,
    failures: u32,
) -> Result<Vec<S::Output>, ApiError>
where
    G: StructuredGenerator + ?Sized,
    S: OutputSchema,
{
    let descriptor = schema.descriptor();
    let prompt = assemble_batch_prompt(
        batch.items,
        template.prompt_context.as_ref(),
        &template.prompt_options,
        Some(descriptor),
    );
    debug!(
        batch_index = batch.index,
        item_count = batch.len(),
        attempt = failures + 1,
        "Dispatching batch"
    );
    if template.debug {
        debug!(
            target: DEBUG_TARGET,
            batch_index = batch.index,
            prompt = %prompt,
            "Prompt (batch)"
        );
    }

    let GeneratedOutput { value, response } = generator
        .generate(GenerationRequest {
            prompt,
            schema: descriptor.clone(),
            output_mode: template.output_mode,
            render_mode: template.render_mode,
            options: template.options.clone(),
        })
        .await?;

    if template.debug {
        log_debug_response(Some(batch.index), &response);
    }

    normalize_cardinality(value)
        .into_iter()
        .map(|value| schema.coerce(value))
        .collect()
}

/// Drives one batched transformation from partitioning to the flattened result.
///
/// Every batch runs to a terminal state even when a sibling fails; the call
/// then returns the first failure observed. No partial output is returned on
/// failure.
pub struct BatchOrchestrator {
    settings: BatchSettings,
    pause: Arc<dyn Pause>,
}

impl BatchOrchestrator {
    pub fn new(settings: BatchSettings) -> Self {
        Self::with_pause(settings, Arc::new(TokioPause))
    }

    /// Use a custom pause between retries (tests use a recording fake).
    pub fn with_pause(settings: BatchSettings, pause: Arc<dyn Pause>) -> Self {
        Self { settings, pause }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    pub async fn run<G, S>(
        &self,
        generator: &G,
        schema: &S,
        items: &[InputItem],
        template: &RequestTemplate,
        observer: Option<&dyn BatchObserver<S::Output>>,
    ) -> Result<Vec<S::Output>, ApiError>
    where
        G: StructuredGenerator + ?Sized,
        S: OutputSchema,
    {
        let batches = partition(items, self.settings.batch_size)?;
        if batches.is_empty() {
            debug!("No input items, skipping generation");
            return Ok(Vec::new());
        }

        let gate = ConcurrencyGate::for_concurrency(self.settings.concurrency);
        info!(
            item_count = items.len(),
            batch_count = batches.len(),
            batch_size = self.settings.batch_size,
            concurrency = gate.limit(),
            max_retries = self.settings.retry.max_retries,
            provider = generator.provider_name(),
            model = generator.model_name(),
            "Starting batched generation"
        );

        let controller = RetryController::new(self.settings.retry, self.pause.as_ref());
        let controller = &controller;
        let tasks: Vec<BoxFuture<'_, (usize, Result<Vec<S::Output>, ApiError>)>> = batches
            .iter()
            .copied()
            .map(|batch| {
                async move {
                    let outcome = controller
                        .attempt(move |failures| {
                            generate_batch(generator, schema, batch, template, failures)
                        })
                        .await;
                    (batch.index, outcome)
                }
                .boxed()
            })
            .collect();

        let slots = ResultSlots::new(batches.len());
        let mut first_error: Option<ApiError> = None;
        let mut outcomes = gate.admit(tasks).fuse();
        // Observers run here, beside the gate stream, so a slow observer never
        // holds back admission of queued batches.
        let mut callbacks: FuturesUnordered<BoxFuture<'_, (usize, anyhow::Result<()>)>> =
            FuturesUnordered::new();

        loop {
            tokio::select! {
                Some((batch_index, outcome)) = outcomes.next() => {
                    let result = match outcome {
                        Ok(result) => result,
                        Err(err) => {
                            error!(batch_index, error = %err, "Batch failed");
                            first_error.get_or_insert(err);
                            continue;
                        }
                    };

                    let recorded = match slots.fill(batch_index, result) {
                        Ok(recorded) => recorded,
                        Err(err) => {
                            first_error.get_or_insert(err);
                            continue;
                        }
                    };
                    debug!(
                        batch_index,
                        result_count = recorded.len(),
                        "Batch result recorded"
                    );

                    if let Some(observer) = observer {
                        let report = BatchReport {
                            batch_index,
                            items: batches[batch_index].items,
                            result: recorded,
                        };
                        callbacks.push(
                            async move { (batch_index, observer.on_batch_result(report).await) }
                                .boxed(),
                        );
                    }
                }
                Some((batch_index, callback)) = callbacks.next(), if !callbacks.is_empty() => {
                    if let Err(err) = callback {
                        warn!(batch_index, error = %err, "Batch result callback failed");
                        first_error.get_or_insert(ApiError::CallbackFailed {
                            batch_index,
                            message: format!("{:#}", err),
                        });
                    }
                }
                else => break,
            }
        }
        drop(callbacks);
        drop(outcomes);

        if let Some(err) = first_error {
            info!(
                batch_count = batches.len(),
                succeeded = slots.filled(),
                "Batched generation failed"
            );
            return Err(err);
        }

        let output = slots.flatten();
        info!(
            batch_count = batches.len(),
            output_count = output.len(),
            "Batched generation completed"
        );
        Ok(output)
    }
}
