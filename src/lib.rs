//! Tamer: Batched Structured-Output Transformation
//!
//! Partitions input records into fixed-size batches, sends each batch to a
//! text-generation backend with a requested output shape, retries transient
//! failures and reassembles validated results in input order.

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod prompt;
pub mod provider;
pub mod schema;
pub mod transform;
pub mod types;

pub use error::ApiError;
pub use transform::{
    transform_batch, transform_object, transform_object_stream, ObjectStream, ObjectStreamEvent,
    TransformBatchOptions, TransformObjectOptions, TransformedObject,
};
