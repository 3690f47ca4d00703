//! Public transformation operations
//!
//! [`transform_batch`] runs the batch orchestrator over a list of items;
//! [`transform_object`] asks the gateway for exactly one structured value and
//! [`transform_object_stream`] does the same while streaming the raw output.
//! All take a gateway implementing [`StructuredGenerator`] and a schema
//! implementing [`OutputSchema`].

use crate::batch::orchestrator::{log_debug_response, DEBUG_TARGET};
use crate::batch::{
    BatchObserver, BatchOrchestrator, BatchSettings, Pause, RequestTemplate, RetryController,
    RetryPolicy, TokioPause, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY,
};
use crate::error::ApiError;
use crate::prompt::{assemble_batch_prompt, assemble_single_prompt, PromptContext, PromptOptions};
use crate::provider::{
    GenerationOptions, GenerationRequest, ResponseMetadata, StreamEvent, StructuredGenerator,
};
use crate::schema::OutputSchema;
use crate::types::{InputItem, OutputMode, RenderMode};
use futures::stream::{BoxStream, StreamExt};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Options for [`transform_batch`].
pub struct TransformBatchOptions<'a, S: OutputSchema> {
    pub items: &'a [InputItem],
    pub schema: &'a S,
    pub output_mode: OutputMode,
    pub render_mode: RenderMode,
    pub batch_size: usize,
    pub concurrency: usize,
    pub prompt_context: Option<PromptContext>,
    pub prompt_options: PromptOptions,
    pub max_retries: u32,
    pub repair: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub provider_options: Map<String, Value>,
    pub observer: Option<&'a dyn BatchObserver<S::Output>>,
    pub debug: bool,
    /// Backoff clock; the tokio timer when unset
    pub pause: Option<Arc<dyn Pause>>,
}

impl<'a, S: OutputSchema> TransformBatchOptions<'a, S> {
    pub fn new(items: &'a [InputItem], schema: &'a S) -> Self {
        let retry = RetryPolicy::default();
        Self {
            items,
            schema,
            output_mode: OutputMode::Array,
            render_mode: RenderMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            prompt_context: None,
            prompt_options: PromptOptions::default(),
            max_retries: retry.max_retries,
            repair: retry.repair,
            max_tokens: None,
            temperature: None,
            provider_options: Map::new(),
            observer: None,
            debug: false,
            pause: None,
        }
    }
}

/// Options for [`transform_object`].
pub struct TransformObjectOptions<'a, S: OutputSchema> {
    pub items: &'a [InputItem],
    pub schema: &'a S,
    pub output_mode: OutputMode,
    pub render_mode: RenderMode,
    pub prompt_context: Option<PromptContext>,
    pub prompt_options: PromptOptions,
    pub max_retries: u32,
    pub repair: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub provider_options: Map<String, Value>,
    pub debug: bool,
    pub pause: Option<Arc<dyn Pause>>,
}

impl<'a, S: OutputSchema> TransformObjectOptions<'a, S> {
    pub fn new(schema: &'a S) -> Self {
        let retry = RetryPolicy::default();
        Self {
            items: &[],
            schema,
            output_mode: OutputMode::Object,
            render_mode: RenderMode::default(),
            prompt_context: None,
            prompt_options: PromptOptions::default(),
            max_retries: retry.max_retries,
            repair: retry.repair,
            max_tokens: None,
            temperature: None,
            provider_options: Map::new(),
            debug: false,
            pause: None,
        }
    }
}

/// Result of [`transform_object`].
#[derive(Debug, Clone)]
pub struct TransformedObject<T> {
    pub data: T,
    pub response: ResponseMetadata,
}

/// One step of [`transform_object_stream`].
#[derive(Debug, Clone)]
pub enum ObjectStreamEvent<T> {
    /// Raw output text received since the previous event
    Delta(String),
    /// The validated value; always the last event of a successful stream
    Done(TransformedObject<T>),
}

pub type ObjectStream<'a, T> = BoxStream<'a, Result<ObjectStreamEvent<T>, ApiError>>;

fn pause_or_default(pause: Option<Arc<dyn Pause>>) -> Arc<dyn Pause> {
    pause.unwrap_or_else(|| Arc::new(TokioPause))
}

/// Transform `options.items` in batches and return one flat, input-ordered
/// result list.
pub async fn transform_batch<G, S>(
    generator: &G,
    options: TransformBatchOptions<'_, S>,
) -> Result<Vec<S::Output>, ApiError>
where
    G: StructuredGenerator + ?Sized,
    S: OutputSchema,
{
    let TransformBatchOptions {
        items,
        schema,
        output_mode,
        render_mode,
        batch_size,
        concurrency,
        prompt_context,
        prompt_options,
        max_retries,
        repair,
        max_tokens,
        temperature,
        provider_options,
        observer,
        debug,
        pause,
    } = options;

    let settings = BatchSettings {
        batch_size,
        concurrency,
        retry: RetryPolicy {
            max_retries,
            repair,
        },
    };
    let template = RequestTemplate {
        output_mode,
        render_mode,
        prompt_context,
        prompt_options,
        options: GenerationOptions {
            max_tokens,
            temperature,
            provider_options,
        },
        debug,
    };

    BatchOrchestrator::with_pause(settings, pause_or_default(pause))
        .run(generator, schema, items, &template, observer)
        .await
}

/// Check the items/prompt-context precondition and build the one request.
fn single_request<S: OutputSchema>(
    options: &TransformObjectOptions<'_, S>,
    label: &'static str,
) -> Result<GenerationRequest, ApiError> {
    if options.items.is_empty() && options.prompt_context.is_none() {
        return Err(ApiError::ConfigError(
            "transform_object requires items or a prompt context".to_string(),
        ));
    }

    let descriptor = options.schema.descriptor();
    let prompt = if options.items.is_empty() {
        assemble_single_prompt(
            options.prompt_context.as_ref(),
            &options.prompt_options,
            Some(descriptor),
        )
    } else {
        assemble_batch_prompt(
            options.items,
            options.prompt_context.as_ref(),
            &options.prompt_options,
            Some(descriptor),
        )
    };
    if options.debug {
        debug!(target: DEBUG_TARGET, prompt = %prompt, "{}", label);
    }

    Ok(GenerationRequest {
        prompt,
        schema: descriptor.clone(),
        output_mode: options.output_mode,
        render_mode: options.render_mode,
        options: GenerationOptions {
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            provider_options: options.provider_options.clone(),
        },
    })
}

/// Ask the gateway for a single structured value.
///
/// Needs items or a prompt context; with neither, fails before any gateway
/// call. Items, when present, are rendered with the batch prompt.
pub async fn transform_object<G, S>(
    generator: &G,
    options: TransformObjectOptions<'_, S>,
) -> Result<TransformedObject<S::Output>, ApiError>
where
    G: StructuredGenerator + ?Sized,
    S: OutputSchema,
{
    let request = single_request(&options, "Prompt (object)")?;

    info!(
        item_count = options.items.len(),
        output_mode = options.output_mode.as_str(),
        provider = generator.provider_name(),
        model = generator.model_name(),
        "Starting single-object generation"
    );

    let pause = pause_or_default(options.pause.clone());
    let controller = RetryController::new(
        RetryPolicy {
            max_retries: options.max_retries,
            repair: options.repair,
        },
        pause.as_ref(),
    );
    let schema = options.schema;
    let debug_enabled = options.debug;
    let request = &request;

    controller
        .attempt(move |failures| async move {
            debug!(attempt = failures + 1, "Dispatching single-object request");
            let generated = generator.generate(request.clone()).await?;
            if debug_enabled {
                log_debug_response(None, &generated.response);
            }
            Ok(TransformedObject {
                data: schema.coerce(generated.value)?,
                response: generated.response,
            })
        })
        .await
}

/// Stream a single structured value as the gateway produces it.
///
/// Same precondition and prompt choice as [`transform_object`]. Opening the
/// stream is retried with the usual backoff; once output flows, a failure
/// (including a final value that fails validation) ends the stream with that
/// error.
pub async fn transform_object_stream<'a, G, S>(
    generator: &'a G,
    options: TransformObjectOptions<'a, S>,
) -> Result<ObjectStream<'a, S::Output>, ApiError>
where
    G: StructuredGenerator + ?Sized,
    S: OutputSchema,
{
    let request = single_request(&options, "Prompt (object stream)")?;

    info!(
        item_count = options.items.len(),
        output_mode = options.output_mode.as_str(),
        provider = generator.provider_name(),
        model = generator.model_name(),
        "Starting streamed single-object generation"
    );

    let pause = pause_or_default(options.pause.clone());
    let controller = RetryController::new(
        RetryPolicy {
            max_retries: options.max_retries,
            repair: options.repair,
        },
        pause.as_ref(),
    );
    let request = &request;
    let events = controller
        .attempt(move |failures| async move {
            debug!(attempt = failures + 1, "Opening single-object stream");
            generator.stream(request.clone()).await
        })
        .await?;

    let schema = options.schema;
    let debug_enabled = options.debug;
    Ok(events
        .map(move |event| match event? {
            StreamEvent::Delta(text) => Ok(ObjectStreamEvent::Delta(text)),
            StreamEvent::Done(generated) => {
                if debug_enabled {
                    log_debug_response(None, &generated.response);
                }
                Ok(ObjectStreamEvent::Done(TransformedObject {
                    data: schema.coerce(generated.value)?,
                    response: generated.response,
                }))
            }
        })
        .boxed())
}
