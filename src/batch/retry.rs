//! Retry/repair control for a single generation task.
//!
//! Retries are a bounded state machine: `Attempting(n)` moves to `Succeeded`
//! on success, back to `Attempting(n + 1)` after a pause while the budget
//! allows it, and to `Failed(n)` once `n` exceeds `max_retries`. The pause
//! length is a pure function of the attempt number.

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const BACKOFF_STEP: Duration = Duration::from_millis(1000);
const BACKOFF_CAP: Duration = Duration::from_millis(3000);

/// Delay before the retry that follows failure number `attempt` (1-based):
/// `min(1000ms * attempt, 3000ms)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    (BACKOFF_STEP * attempt).min(BACKOFF_CAP)
}

/// Injected clock for backoff waits.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Pauses on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry budget for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means a single attempt
    pub max_retries: u32,
    /// Kept for parity with callers that toggle it; both settings retry the
    /// same way
    pub repair: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            repair: true,
        }
    }
}

/// State of a retried task. The counter is the number of failures so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting(u32),
    Succeeded,
    Failed(u32),
}

impl RetryState {
    /// Transition on the outcome of the attempt made in this state.
    pub fn step(self, succeeded: bool, policy: &RetryPolicy) -> RetryState {
        match self {
            RetryState::Attempting(_) if succeeded => RetryState::Succeeded,
            RetryState::Attempting(failures) => {
                let failures = failures + 1;
                if failures > policy.max_retries {
                    RetryState::Failed(failures)
                } else {
                    RetryState::Attempting(failures)
                }
            }
            terminal => terminal,
        }
    }
}

/// Runs a task under a [`RetryPolicy`], pausing between attempts.
pub struct RetryController<'p> {
    policy: RetryPolicy,
    pause: &'p dyn Pause,
}

impl<'p> RetryController<'p> {
    pub fn new(policy: RetryPolicy, pause: &'p dyn Pause) -> Self {
        Self { policy, pause }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `task` until it succeeds or the budget is spent.
    ///
    /// `task` receives the number of failures so far and reruns from scratch
    /// each time. The last error is returned unchanged.
    pub async fn attempt<T, F, Fut>(&self, mut task: F) -> Result<T, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut failures = 0;
        loop {
            let outcome = task(failures).await;
            let next = RetryState::Attempting(failures).step(outcome.is_ok(), &self.policy);
            match (next, outcome) {
                (_, Ok(value)) => return Ok(value),
                (_, Err(err)) if !err.is_retryable() => return Err(err),
                (RetryState::Attempting(attempt), Err(err)) => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        attempt,
                        max_retries = self.policy.max_retries,
                        repair = self.policy.repair,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Generation attempt failed, retrying"
                    );
                    self.pause.pause(delay).await;
                    failures = attempt;
                }
                (_, Err(err)) => {
                    debug!(
                        attempts = failures + 1,
                        max_retries = self.policy.max_retries,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    return Err(err);
                }
            }
        }
    }
}
