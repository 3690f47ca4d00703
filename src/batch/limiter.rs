//! Concurrency limiting
//!
//! A gate admits at most N tasks from a fixed list at a time, in submission
//! order, and reports outputs as tasks complete. The bounded gate and the
//! direct passthrough share the same contract; the passthrough is chosen once
//! per call when the limit collapses to 1.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

/// Generic admission gate over a fixed task list.
pub trait AdmissionGate {
    /// Admit `tasks` FIFO, at most [`AdmissionGate::limit`] at a time.
    /// Items come out in completion order.
    fn admit<'a, T: Send + 'a>(&self, tasks: Vec<BoxFuture<'a, T>>) -> BoxStream<'a, T>;

    fn limit(&self) -> usize;
}

/// Runs up to `limit` tasks concurrently.
#[derive(Debug, Clone, Copy)]
pub struct BoundedGate {
    limit: usize,
}

impl BoundedGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }
}

impl AdmissionGate for BoundedGate {
    fn admit<'a, T: Send + 'a>(&self, tasks: Vec<BoxFuture<'a, T>>) -> BoxStream<'a, T> {
        // buffer_unordered starts futures in stream order and never holds
        // more than `limit` of them.
        stream::iter(tasks).buffer_unordered(self.limit).boxed()
    }

    fn limit(&self) -> usize {
        self.limit
    }
}

/// Awaits each task to completion before starting the next.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectGate;

impl AdmissionGate for DirectGate {
    fn admit<'a, T: Send + 'a>(&self, tasks: Vec<BoxFuture<'a, T>>) -> BoxStream<'a, T> {
        stream::iter(tasks).then(|task| task).boxed()
    }

    fn limit(&self) -> usize {
        1
    }
}

/// Gate strategy picked once from the requested concurrency.
#[derive(Debug, Clone, Copy)]
pub enum ConcurrencyGate {
    Bounded(BoundedGate),
    Direct(DirectGate),
}

impl ConcurrencyGate {
    /// A concurrency of 0 is treated as 1.
    pub fn for_concurrency(concurrency: usize) -> Self {
        if concurrency <= 1 {
            ConcurrencyGate::Direct(DirectGate)
        } else {
            ConcurrencyGate::Bounded(BoundedGate::new(concurrency))
        }
    }
}

impl AdmissionGate for ConcurrencyGate {
    fn admit<'a, T: Send + 'a>(&self, tasks: Vec<BoxFuture<'a, T>>) -> BoxStream<'a, T> {
        match self {
            ConcurrencyGate::Bounded(gate) => gate.admit(tasks),
            ConcurrencyGate::Direct(gate) => gate.admit(tasks),
        }
    }

    fn limit(&self) -> usize {
        match self {
            ConcurrencyGate::Bounded(gate) => gate.limit(),
            ConcurrencyGate::Direct(gate) => gate.limit(),
        }
    }
}
