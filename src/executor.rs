//! Execution of a single work item
//!
//! [`WorkExecutor::run`] drives the attempt/backoff loop. The circuit breaker
//! is consulted before the first attempt and again before every retry: an item
//! refused up front is `Skipped`, one refused mid-way is `Failed` with the
//! attempts it made. Each attempt holds an item slot and runs under the
//! per-item timeout, the slot is released while sleeping between attempts, and
//! cancellation ends the loop at the next backoff or slot wait. Failures are
//! recorded into the outcome and never propagated as errors.

use crate::circuit_breaker::CircuitBreaker;
use crate::error::WorkError;
use crate::limiter::ItemSlots;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::source::{WorkContext, WorkSource};
use crate::types::{ErrorStats, Event, ItemErrorKind, ItemOutcome, TaskId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, broadcast};
use tokio_util::sync::CancellationToken;

/// Everything needed to run one item
pub struct ItemRequest<'a> {
    /// Owning task
    pub task_id: TaskId,
    /// Item target
    pub target: &'a str,
    /// Retry limits and backoff of the owning task
    pub policy: &'a RetryPolicy,
    /// Deadline of a single attempt
    pub item_timeout: Duration,
    /// The owning task's item slots
    pub slots: &'a ItemSlots,
    /// A slot already held for the first attempt, if the caller acquired one
    pub first_slot: Option<OwnedSemaphorePermit>,
    /// Stops retries and is forwarded to the work source
    pub cancel: &'a CancellationToken,
    /// Called with the attempt number as each attempt starts
    pub on_attempt: &'a (dyn Fn(u32) + Send + Sync),
}

/// Final outcome of one item
#[derive(Clone, Debug, PartialEq)]
pub struct ItemReport {
    /// `Success`, `Failed` or `Skipped`
    pub outcome: ItemOutcome,
    /// Attempts made
    pub attempts: u32,
    /// Failure classification
    pub error_kind: Option<ItemErrorKind>,
    /// Failure message
    pub error: Option<String>,
    /// Payload on success
    pub payload: Option<serde_json::Value>,
}

impl ItemReport {
    fn success(attempts: u32, payload: serde_json::Value) -> Self {
        Self {
            outcome: ItemOutcome::Success,
            attempts,
            error_kind: None,
            error: None,
            payload: Some(payload),
        }
    }

    fn failed(attempts: u32, error: &WorkError) -> Self {
        Self {
            outcome: ItemOutcome::Failed,
            attempts,
            error_kind: Some(ItemErrorKind::from(error)),
            error: Some(error.to_string()),
            payload: None,
        }
    }

    fn circuit_opened_during_retries(attempts: u32, key: &str, last_error: &WorkError) -> Self {
        Self {
            outcome: ItemOutcome::Failed,
            attempts,
            error_kind: Some(ItemErrorKind::CircuitOpen),
            error: Some(format!(
                "circuit open for {} after {} attempts, last error: {}",
                key, attempts, last_error
            )),
            payload: None,
        }
    }

    fn circuit_open(key: &str) -> Self {
        Self {
            outcome: ItemOutcome::Skipped,
            attempts: 0,
            error_kind: Some(ItemErrorKind::CircuitOpen),
            error: Some(format!("circuit open for {}", key)),
            payload: None,
        }
    }
}

#[derive(Debug, Default)]
struct ErrorCounters {
    timeouts: AtomicU64,
    connection_errors: AtomicU64,
    permanent_errors: AtomicU64,
    circuit_open_skips: AtomicU64,
    cancellations: AtomicU64,
}

impl ErrorCounters {
    fn record(&self, error: &WorkError) {
        let counter = match error {
            WorkError::Timeout => &self.timeouts,
            WorkError::Connection(_) => &self.connection_errors,
            WorkError::Permanent(_) => &self.permanent_errors,
            WorkError::Cancelled => &self.cancellations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs items against a [`WorkSource`] with retry and circuit-breaker checks
#[derive(Debug)]
pub struct WorkExecutor {
    breaker: Arc<CircuitBreaker>,
    counters: ErrorCounters,
    event_tx: broadcast::Sender<Event>,
}

impl WorkExecutor {
    /// Create an executor sharing `breaker` and publishing circuit events on `event_tx`
    pub fn new(breaker: Arc<CircuitBreaker>, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            breaker,
            counters: ErrorCounters::default(),
            event_tx,
        }
    }

    /// The shared circuit breaker
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Failure counters accumulated across all items
    pub fn error_stats(&self) -> ErrorStats {
        ErrorStats {
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            connection_errors: self.counters.connection_errors.load(Ordering::Relaxed),
            permanent_errors: self.counters.permanent_errors.load(Ordering::Relaxed),
            circuit_open_skips: self.counters.circuit_open_skips.load(Ordering::Relaxed),
            cancellations: self.counters.cancellations.load(Ordering::Relaxed),
        }
    }

    /// Run one item to its final outcome
    pub async fn run(&self, request: ItemRequest<'_>, source: &dyn WorkSource) -> ItemReport {
        let ItemRequest {
            task_id,
            target,
            policy,
            item_timeout,
            slots,
            mut first_slot,
            cancel,
            on_attempt,
        } = request;

        if !self.breaker.allow(target) {
            self.counters
                .circuit_open_skips
                .fetch_add(1, Ordering::Relaxed);
            let key = CircuitBreaker::key_for(target);
            tracing::debug!(task_id = %task_id, url = %target, circuit = %key, "Circuit open, skipping item");
            return ItemReport::circuit_open(&key);
        }

        let mut attempts = 0;
        let mut last_error = WorkError::Cancelled;

        loop {
            let slot = match first_slot.take() {
                Some(slot) => Some(slot),
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    slot = slots.acquire() => slot.ok(),
                },
            };
            let Some(slot) = slot else {
                return ItemReport::failed(attempts, &last_error);
            };

            attempts += 1;
            on_attempt(attempts);
            let ctx = WorkContext {
                task_id,
                attempt: attempts,
                cancel: cancel.clone(),
            };
            let result =
                match tokio::time::timeout(item_timeout, source.fetch_and_extract(target, &ctx))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(WorkError::Timeout),
                };
            drop(slot);

            let error = match result {
                Ok(payload) => {
                    self.breaker.record_success(target);
                    if attempts > 1 {
                        tracing::info!(task_id = %task_id, url = %target, attempts, "Item succeeded after retry");
                    }
                    return ItemReport::success(attempts, payload);
                }
                Err(error) => error,
            };

            self.counters.record(&error);
            if error != WorkError::Cancelled && self.breaker.record_failure(target) {
                let _ = self.event_tx.send(Event::CircuitOpened {
                    target: CircuitBreaker::key_for(target),
                    failures: self.breaker.failure_count(target),
                });
            }

            match policy.decide(attempts, &error) {
                RetryDecision::GiveUp => {
                    tracing::debug!(
                        task_id = %task_id,
                        url = %target,
                        attempts,
                        error = %error,
                        "Item failed"
                    );
                    return ItemReport::failed(attempts, &error);
                }
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        task_id = %task_id,
                        url = %target,
                        attempt = attempts,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Item attempt failed, retrying"
                    );
                    let cancelled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        return ItemReport::failed(attempts, &error);
                    }
                    if !self.breaker.allow(target) {
                        self.counters
                            .circuit_open_skips
                            .fetch_add(1, Ordering::Relaxed);
                        let key = CircuitBreaker::key_for(target);
                        tracing::debug!(task_id = %task_id, url = %target, circuit = %key, attempts, "Circuit open, retries stopped");
                        return ItemReport::circuit_opened_during_retries(attempts, &key, &error);
                    }
                    last_error = error;
                }
            }
        }
    }
}
