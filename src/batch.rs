//! Batch transformation pipeline: partition, admission gate, retry, slot
//! assembly and the orchestrator that drives them.

pub mod assemble;
pub mod limiter;
pub mod orchestrator;
pub mod partition;
pub mod retry;

pub use assemble::ResultSlots;
pub use limiter::{AdmissionGate, BoundedGate, ConcurrencyGate, DirectGate};
pub use orchestrator::{
    normalize_cardinality, BatchObserver, BatchOrchestrator, BatchSettings, RequestTemplate,
    DEBUG_TARGET, DEFAULT_CONCURRENCY,
};
pub use partition::{partition, DEFAULT_BATCH_SIZE};
pub use retry::{backoff_delay, Pause, RetryController, RetryPolicy, RetryState, TokioPause};
