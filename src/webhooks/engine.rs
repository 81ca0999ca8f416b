// Webhook engine - the operations exposed to route layers and operators
//
// Manages:
// - Recording inbound webhooks as pending records
// - Immediate processing, listing and lookup
// - Operator replay of terminal records
// - Retention cleanup and per-status statistics
// - Building sweepers that share the engine's store, clock and processor

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::handler::DeliveryHandler;
use super::processor::{AttemptOutcome, DeliveryProcessor, ProcessorSettings};
use super::record::{NewRecord, RecordStatus, WebhookRecord};
use super::retry::RetryPolicy;
use super::state::{self, AttemptMode};
use super::store::{ListQuery, RecordPage, RecordStats, RecordStore, SwapOutcome};
use super::sweeper::{RetrySweeper, SweepSettings};
use crate::error::{Result, WebhookError};
use crate::metrics;

/// Engine-wide tuning
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineSettings {
    /// Policy copied into records created without an override
    pub default_policy: RetryPolicy,
    pub processor: ProcessorSettings,
    pub sweep: SweepSettings,
}

/// Webhook reliability engine
pub struct WebhookEngine {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    processor: Arc<DeliveryProcessor>,
    settings: EngineSettings,
}

impl WebhookEngine {
    /// Create an engine on the wall clock
    pub fn new(store: Arc<dyn RecordStore>, settings: EngineSettings) -> Self {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    /// Create an engine with an injected time source
    pub fn with_clock(
        store: Arc<dyn RecordStore>,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let processor = Arc::new(DeliveryProcessor::new(
            store.clone(),
            clock.clone(),
            settings.processor,
        ));
        Self {
            store,
            clock,
            processor,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Persist a new `pending` record with `attempts = 0`.
    ///
    /// Nothing is processed here; call [`process_now`](Self::process_now) or
    /// let a sweep pick the record up.
    pub async fn create_record(&self, input: NewRecord) -> Result<WebhookRecord> {
        input.validate()?;
        let record = input.into_record(&self.settings.default_policy, self.clock.now());
        let record = self.store.insert(record).await?;

        metrics::RECORDS_CREATED_TOTAL
            .with_label_values(&[record.source.as_str()])
            .inc();
        info!(
            record_id = %record.id,
            tenant_id = %record.tenant_id,
            source = %record.source,
            event_type = %record.event_type,
            "Webhook recorded"
        );
        Ok(record)
    }

    /// Attempt a record right away, ignoring `next_attempt_at`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id. `Conflict` if the record is terminal, is
    /// already being attempted, or changed concurrently.
    pub async fn process_now(
        &self,
        id: Uuid,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<WebhookRecord> {
        match self
            .processor
            .attempt(id, handler, AttemptMode::Immediate)
            .await?
        {
            AttemptOutcome::Completed(record) => Ok(record),
            AttemptOutcome::Skipped { record_id, reason } => Err(WebhookError::Conflict(
                format!("record {} cannot be processed: {}", record_id, reason),
            )),
        }
    }

    /// Filtered, paginated listing for one tenant, newest first
    pub async fn list_records(&self, query: &ListQuery) -> Result<RecordPage> {
        query.validate()?;
        self.store.list(query).await
    }

    pub async fn get_record(&self, id: Uuid) -> Result<WebhookRecord> {
        self.store.get(id).await?.ok_or(WebhookError::NotFound(id))
    }

    /// Re-arm a terminal record: back to `pending` with attempts cleared.
    ///
    /// The record is not processed here. A sweep picks it up once it has been
    /// pending for the configured grace period, or the caller can follow up
    /// with [`process_now`](Self::process_now).
    pub async fn replay(&self, id: Uuid) -> Result<WebhookRecord> {
        let record = self.get_record(id).await?;
        let reset = state::reset_for_replay(&record, self.clock.now())?;

        match self.store.compare_and_swap(record.version, reset).await? {
            SwapOutcome::Applied(stored) => {
                metrics::REPLAYS_TOTAL.inc();
                info!(
                    record_id = %stored.id,
                    previous_status = %record.status,
                    replay_count = stored.replay_count,
                    "Webhook record replayed"
                );
                Ok(stored)
            }
            SwapOutcome::Stale => Err(WebhookError::Conflict(format!(
                "record {} changed while replay was requested",
                id
            ))),
            SwapOutcome::Missing => Err(WebhookError::NotFound(id)),
        }
    }

    /// Delete `success` and `failed` records created more than
    /// `retention_days` ago. Non-terminal records are never touched.
    pub async fn cleanup(&self, retention_days: u32) -> Result<usize> {
        let cutoff = self.clock.now() - Duration::days(i64::from(retention_days));
        let deleted = self
            .store
            .delete_terminal_before(cutoff, &[RecordStatus::Success, RecordStatus::Failed])
            .await?;

        metrics::RECORDS_CLEANED_TOTAL.inc_by(deleted as u64);
        if deleted > 0 {
            info!(deleted, retention_days, "Removed expired webhook records");
        } else {
            debug!(retention_days, "No webhook records past retention");
        }
        Ok(deleted)
    }

    /// Per-status counts, optionally for one tenant
    pub async fn stats(&self, tenant_id: Option<&str>) -> Result<RecordStats> {
        self.store.stats(tenant_id).await
    }

    /// Build a sweeper sharing this engine's store, clock and processor
    pub fn sweeper(&self, handler: Arc<dyn DeliveryHandler>) -> RetrySweeper {
        RetrySweeper::new(
            self.store.clone(),
            self.clock.clone(),
            self.processor.clone(),
            handler,
            self.settings.sweep,
        )
    }

    /// Run one sweep with `handler`
    pub async fn sweep_due(&self, limit: usize, handler: Arc<dyn DeliveryHandler>) -> Result<usize> {
        let processed = self.sweeper(handler).sweep_due(limit).await;
        if let Err(e) = &processed {
            warn!("Sweep failed: {}", e);
        }
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::clock::ManualClock;
    use crate::webhooks::handler::{FnHandler, HandlerResponse};
    use crate::webhooks::record::WebhookSource;
    use crate::webhooks::store::MemoryRecordStore;
    use chrono::Utc;
    use serde_json::json;

    fn engine() -> (WebhookEngine, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let engine = WebhookEngine::with_clock(
            Arc::new(MemoryRecordStore::new()),
            EngineSettings::default(),
            Arc::new(clock.clone()),
        );
        (engine, clock)
    }

    fn handler(status: u16) -> Arc<dyn DeliveryHandler> {
        Arc::new(FnHandler::new(move |_record: WebhookRecord| async move {
            Ok::<_, anyhow::Error>(HandlerResponse::with_status(status))
        }))
    }

    fn input(tenant: &str) -> NewRecord {
        NewRecord::new(tenant, "charge.succeeded", WebhookSource::Stripe, json!({"amount": 1200}))
    }

    #[tokio::test]
    async fn test_create_record_starts_pending_with_default_policy() {
        let (engine, _) = engine();
        let record = engine.create_record(input("org-1")).await.unwrap();

        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.max_attempts, 6);
        assert_eq!(record.backoff_schedule_minutes, vec![1, 5, 15, 60, 360]);
        assert_eq!(engine.get_record(record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_create_record_rejects_invalid_input() {
        let (engine, _) = engine();
        let result = engine.create_record(input("  ")).await;
        assert!(matches!(result, Err(WebhookError::Validation(_))));
        assert_eq!(engine.stats(None).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_get_unknown_record() {
        let (engine, _) = engine();
        let err = engine.get_record(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_process_now_on_terminal_record_conflicts() {
        let (engine, _) = engine();
        let record = engine.create_record(input("org-1")).await.unwrap();
        engine.process_now(record.id, handler(200)).await.unwrap();

        let result = engine.process_now(record.id, handler(200)).await;
        assert!(matches!(result, Err(WebhookError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_process_now_ignores_backoff() {
        let (engine, _) = engine();
        let record = engine.create_record(input("org-1")).await.unwrap();
        let retrying = engine.process_now(record.id, handler(500)).await.unwrap();
        assert_eq!(retrying.status, RecordStatus::Retrying);

        let done = engine.process_now(record.id, handler(200)).await.unwrap();
        assert_eq!(done.status, RecordStatus::Success);
        assert_eq!(done.attempts, 2);
    }

    #[tokio::test]
    async fn test_replay_only_from_terminal_states() {
        let (engine, _) = engine();
        let record = engine.create_record(input("org-1")).await.unwrap();

        let result = engine.replay(record.id).await;
        assert!(matches!(result, Err(WebhookError::Conflict(_))));

        engine.process_now(record.id, handler(200)).await.unwrap();
        let replayed = engine.replay(record.id).await.unwrap();
        assert_eq!(replayed.status, RecordStatus::Pending);
        assert_eq!(replayed.attempts, 0);
        assert!(replayed.last_result.is_none());
        assert!(replayed.next_attempt_at.is_none());
        assert_eq!(replayed.replay_count, 1);
        assert_eq!(replayed.history.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_unknown_record() {
        let (engine, _) = engine();
        let err = engine.replay(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention_and_status() {
        let (engine, clock) = engine();
        let old_done = engine.create_record(input("org-1")).await.unwrap();
        engine.process_now(old_done.id, handler(200)).await.unwrap();
        let old_retrying = engine.create_record(input("org-1")).await.unwrap();
        engine.process_now(old_retrying.id, handler(500)).await.unwrap();

        clock.advance(Duration::days(100));
        let fresh = engine.create_record(input("org-1")).await.unwrap();
        engine.process_now(fresh.id, handler(200)).await.unwrap();

        assert_eq!(engine.cleanup(90).await.unwrap(), 1);
        assert!(engine.get_record(old_done.id).await.unwrap_err().is_not_found());
        assert!(engine.get_record(old_retrying.id).await.is_ok());
        assert!(engine.get_record(fresh.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_records_validates_query() {
        let (engine, _) = engine();
        let result = engine.list_records(&ListQuery::new("org-1").page(0, 10)).await;
        assert!(matches!(result, Err(WebhookError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stats_per_tenant() {
        let (engine, _) = engine();
        let a = engine.create_record(input("org-a")).await.unwrap();
        engine.create_record(input("org-a")).await.unwrap();
        engine.create_record(input("org-b")).await.unwrap();
        engine.process_now(a.id, handler(200)).await.unwrap();

        let stats = engine.stats(Some("org-a")).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(engine.stats(None).await.unwrap().total, 3);
    }
}
