//! Retry Sweeper
//!
//! Periodically finds records whose retry is due and hands each to the
//! [`DeliveryProcessor`] in scheduled mode. A sweep never holds anything
//! across records: every record is re-checked and claimed with its own
//! compare-and-swap, so overlapping sweeps or sweeper instances cannot
//! double-process a record.

use chrono::Duration;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::handler::DeliveryHandler;
use super::processor::{AttemptOutcome, DeliveryProcessor};
use super::state::AttemptMode;
use super::store::{DueQuery, RecordStore};
use crate::error::{Result, WebhookError};
use crate::metrics;

/// Sweep tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSettings {
    /// Time between sweeps in [`RetrySweeper::run`]
    pub interval: std::time::Duration,
    /// Maximum records attempted per sweep
    pub batch_limit: usize,
    /// Attempts in flight at once within one sweep
    pub concurrency: usize,
    /// How long a `pending` record may sit untouched before the sweeper picks it up
    pub pending_grace: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60),
            batch_limit: 100,
            concurrency: 4,
            pending_grace: Duration::seconds(60),
        }
    }
}

/// Periodic retry driver
pub struct RetrySweeper {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    processor: Arc<DeliveryProcessor>,
    handler: Arc<dyn DeliveryHandler>,
    settings: SweepSettings,
}

impl RetrySweeper {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        processor: Arc<DeliveryProcessor>,
        handler: Arc<dyn DeliveryHandler>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            store,
            clock,
            processor,
            handler,
            settings,
        }
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Attempt up to `limit` due records and return how many were processed.
    ///
    /// Records that turn out to be ineligible (already claimed, not due any
    /// more) are skipped and not counted. A record that changed mid-attempt is
    /// logged and skipped; the sweep carries on.
    ///
    /// # Errors
    ///
    /// `Validation` for a zero limit. `Store` if the due query or any write
    /// fails; the remaining records of the batch are still attempted first.
    pub async fn sweep_due(&self, limit: usize) -> Result<usize> {
        if limit == 0 {
            return Err(WebhookError::Validation(
                "sweep limit must be at least 1".to_string(),
            ));
        }
        metrics::SWEEPS_TOTAL.inc();

        let now = self.clock.now();
        let query = DueQuery {
            now,
            pending_before: now - self.settings.pending_grace,
            limit,
        };

        let due = match self.store.due(&query).await {
            Ok(due) => due,
            Err(e) => {
                metrics::SWEEP_ERRORS_TOTAL.inc();
                error!("Failed to query due records: {}", e);
                return Err(e);
            }
        };
        metrics::SWEEP_LAST_DUE.set(due.len() as i64);

        if due.is_empty() {
            debug!("No webhook records due");
            return Ok(0);
        }

        let found = due.len();
        let results: Vec<Result<AttemptOutcome>> = stream::iter(due)
            .map(|record| {
                let processor = self.processor.clone();
                let handler = self.handler.clone();
                async move {
                    processor
                        .attempt_record(record, handler, AttemptMode::Scheduled)
                        .await
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut processed = 0;
        let mut store_error = None;
        for result in results {
            match result {
                Ok(AttemptOutcome::Completed(_)) => processed += 1,
                Ok(AttemptOutcome::Skipped { .. }) => {}
                Err(e) if e.is_store() => {
                    error!("Store failure during sweep: {}", e);
                    store_error.get_or_insert(e);
                }
                Err(e) => warn!("Sweep attempt abandoned: {}", e),
            }
        }
        metrics::SWEEP_PROCESSED_TOTAL.inc_by(processed as u64);

        if let Some(e) = store_error {
            metrics::SWEEP_ERRORS_TOTAL.inc();
            return Err(e);
        }

        info!(due = found, processed, "Retry sweep complete");
        Ok(processed)
    }

    /// Sweep every `interval` until `shutdown` resolves.
    ///
    /// Sweep failures are logged and the loop keeps going.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.settings.interval.as_secs(),
            batch_limit = self.settings.batch_limit,
            "Retry sweeper started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Retry sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_due(self.settings.batch_limit).await {
                        error!("Retry sweep failed: {}", e);
                    }
                }
            }
        }
    }
}
