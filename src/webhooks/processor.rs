//! Delivery Processor
//!
//! Runs a single processing attempt for one record:
//!
//! 1. Check eligibility and take the attempt (count it, stamp it, lease it)
//!    with a compare-and-swap against the version that was read. Losing the
//!    race means someone else is attempting the record; the attempt is skipped.
//! 2. Invoke the handler on its own task under a timeout. Errors, panics and
//!    timeouts all become failed attempts.
//! 3. Seal the outcome (success, retrying or failed) with a second
//!    compare-and-swap.
//!
//! Store errors propagate to the caller. Handler problems never do.

use chrono::Duration;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::handler::{DeliveryHandler, HandlerResponse};
use super::record::{RecordStatus, WebhookRecord};
use super::state::{self, AttemptMode, Ineligible};
use super::store::{RecordStore, SwapOutcome};
use crate::error::{Result, WebhookError};
use crate::metrics;

/// Timing limits for attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessorSettings {
    /// Upper bound on a single handler invocation
    pub handler_timeout: std::time::Duration,
    /// Extra lease time past the handler timeout before an attempt counts as lost
    pub lease_grace: std::time::Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            handler_timeout: std::time::Duration::from_secs(30),
            lease_grace: std::time::Duration::from_secs(30),
        }
    }
}

impl ProcessorSettings {
    fn lease(&self) -> Duration {
        let total = self.handler_timeout + self.lease_grace;
        Duration::from_std(total).unwrap_or_else(|_| Duration::hours(1))
    }
}

/// Result of asking the processor to attempt a record
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The record changed state; carries the stored record
    Completed(WebhookRecord),
    /// Nothing was attempted
    Skipped { record_id: Uuid, reason: Ineligible },
}

impl AttemptOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AttemptOutcome::Completed(_))
    }
}

/// Orchestrates single processing attempts
pub struct DeliveryProcessor {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    settings: ProcessorSettings,
}

impl DeliveryProcessor {
    /// Create a new delivery processor
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// Load a record by id and attempt it
    ///
    /// # Errors
    ///
    /// `NotFound` if the record does not exist, `Store` on persistence failure,
    /// `Conflict` if the record changed while the attempt was in flight.
    pub async fn attempt(
        &self,
        id: Uuid,
        handler: Arc<dyn DeliveryHandler>,
        mode: AttemptMode,
    ) -> Result<AttemptOutcome> {
        let record = self.store.get(id).await?.ok_or(WebhookError::NotFound(id))?;
        self.attempt_record(record, handler, mode).await
    }

    /// Attempt an already loaded record.
    ///
    /// The snapshot's version is the precondition for taking the attempt, so a
    /// stale snapshot is skipped rather than processed twice.
    pub async fn attempt_record(
        &self,
        record: WebhookRecord,
        handler: Arc<dyn DeliveryHandler>,
        mode: AttemptMode,
    ) -> Result<AttemptOutcome> {
        let now = self.clock.now();

        let begun = match state::begin_attempt(&record, mode, now, self.settings.lease()) {
            Ok(begun) => begun,
            Err(Ineligible::Exhausted) => return self.seal_exhausted(&record).await,
            Err(reason) => return Ok(self.skip(record.id, reason)),
        };

        let begun = match self.store.compare_and_swap(record.version, begun).await? {
            SwapOutcome::Applied(begun) => begun,
            SwapOutcome::Stale => return Ok(self.skip(record.id, Ineligible::Stale)),
            SwapOutcome::Missing => return Err(WebhookError::NotFound(record.id)),
        };

        debug!(
            record_id = %begun.id,
            attempt = begun.attempts,
            max_attempts = begun.max_attempts,
            ?mode,
            "Starting attempt"
        );

        let started = Instant::now();
        let response = self.invoke(handler, begun.clone()).await;
        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        metrics::ATTEMPT_DURATION_SECONDS.observe(elapsed.as_secs_f64());

        let finished_at = self.clock.now();
        let success = response.is_success();
        let result = response.into_last_result();
        let next = if success {
            state::complete_success(&begun, result, finished_at, duration_ms)
        } else {
            state::complete_failure(&begun, result, finished_at, duration_ms)
        };

        let stored = match self.store.compare_and_swap(begun.version, next).await? {
            SwapOutcome::Applied(stored) => stored,
            SwapOutcome::Stale => {
                warn!(record_id = %begun.id, "Record changed while attempt was in flight");
                return Err(WebhookError::Conflict(format!(
                    "record {} changed while attempt {} was in flight",
                    begun.id, begun.attempts
                )));
            }
            SwapOutcome::Missing => return Err(WebhookError::NotFound(begun.id)),
        };

        metrics::ATTEMPTS_TOTAL
            .with_label_values(&[stored.status.as_str()])
            .inc();
        self.log_completion(&stored, duration_ms);

        Ok(AttemptOutcome::Completed(stored))
    }

    async fn invoke(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        record: WebhookRecord,
    ) -> HandlerResponse {
        let timeout = self.settings.handler_timeout;
        let mut task = tokio::spawn(async move { handler.handle(&record).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(e))) => HandlerResponse::failed(format!("handler error: {}", e)),
            Ok(Err(join_error)) if join_error.is_panic() => {
                HandlerResponse::failed("handler panicked")
            }
            Ok(Err(_)) => HandlerResponse::failed("handler cancelled"),
            Err(_) => {
                task.abort();
                HandlerResponse::failed(format!(
                    "handler timed out after {}ms",
                    timeout.as_millis()
                ))
            }
        }
    }

    async fn seal_exhausted(&self, record: &WebhookRecord) -> Result<AttemptOutcome> {
        let sealed = state::seal_exhausted(record, self.clock.now());
        match self.store.compare_and_swap(record.version, sealed).await? {
            SwapOutcome::Applied(stored) => {
                warn!(
                    record_id = %stored.id,
                    attempts = stored.attempts,
                    "Final attempt never completed, marking record failed"
                );
                metrics::ATTEMPTS_TOTAL
                    .with_label_values(&[RecordStatus::Failed.as_str()])
                    .inc();
                Ok(AttemptOutcome::Completed(stored))
            }
            SwapOutcome::Stale => Ok(self.skip(record.id, Ineligible::Stale)),
            SwapOutcome::Missing => Err(WebhookError::NotFound(record.id)),
        }
    }

    fn skip(&self, record_id: Uuid, reason: Ineligible) -> AttemptOutcome {
        debug!(record_id = %record_id, reason = reason.reason(), "Skipping attempt: {}", reason);
        metrics::ATTEMPTS_SKIPPED_TOTAL
            .with_label_values(&[reason.reason()])
            .inc();
        AttemptOutcome::Skipped { record_id, reason }
    }

    fn log_completion(&self, record: &WebhookRecord, duration_ms: u64) {
        let message = record
            .last_result
            .as_ref()
            .and_then(|result| result.message.as_deref())
            .unwrap_or("");
        match record.status {
            RecordStatus::Success => info!(
                record_id = %record.id,
                attempts = record.attempts,
                duration_ms,
                "Webhook processed successfully"
            ),
            RecordStatus::Retrying => warn!(
                record_id = %record.id,
                attempts = record.attempts,
                next_attempt_at = ?record.next_attempt_at,
                "Attempt failed, retry scheduled: {}",
                message
            ),
            RecordStatus::Failed => warn!(
                record_id = %record.id,
                attempts = record.attempts,
                "Attempts exhausted, webhook failed: {}",
                message
            ),
            RecordStatus::Pending => {}
        }
    }
}
