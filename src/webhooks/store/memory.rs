//! In-memory record store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ensure_terminal, DueQuery, ListQuery, RecordPage, RecordStats, RecordStore, SwapOutcome,
};
use crate::error::{Result, WebhookError};
use crate::webhooks::record::{RecordStatus, WebhookRecord};

type TenantKey = (String, DateTime<Utc>, Uuid);
type TimeKey = (DateTime<Utc>, Uuid);

const MAX_ID: Uuid = Uuid::from_u128(u128::MAX);

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<Uuid, WebhookRecord>,
    /// (tenant_id, created_at) listing index
    by_tenant: BTreeSet<TenantKey>,
    /// next_attempt_at of retrying records
    retry_due: BTreeSet<TimeKey>,
    /// updated_at of pending records
    pending: BTreeSet<TimeKey>,
}

impl MemoryState {
    fn index(&mut self, record: &WebhookRecord) {
        self.by_tenant
            .insert((record.tenant_id.clone(), record.created_at, record.id));
        match record.status {
            RecordStatus::Retrying => {
                if let Some(next) = record.next_attempt_at {
                    self.retry_due.insert((next, record.id));
                }
            }
            RecordStatus::Pending => {
                self.pending.insert((record.updated_at, record.id));
            }
            RecordStatus::Success | RecordStatus::Failed => {}
        }
    }

    fn unindex(&mut self, record: &WebhookRecord) {
        self.by_tenant
            .remove(&(record.tenant_id.clone(), record.created_at, record.id));
        if let Some(next) = record.next_attempt_at {
            self.retry_due.remove(&(next, record.id));
        }
        self.pending.remove(&(record.updated_at, record.id));
    }

    fn put(&mut self, record: WebhookRecord) {
        self.index(&record);
        self.records.insert(record.id, record);
    }

    fn take(&mut self, id: &Uuid) -> Option<WebhookRecord> {
        let record = self.records.remove(id)?;
        self.unindex(&record);
        Some(record)
    }
}

/// In-memory webhook record store
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryRecordStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records
    pub fn from_records(records: impl IntoIterator<Item = WebhookRecord>) -> Self {
        let mut state = MemoryState::default();
        for record in records {
            state.put(record);
        }
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// All records, oldest first
    pub async fn snapshot(&self) -> Vec<WebhookRecord> {
        let state = self.state.read().await;
        let mut records: Vec<WebhookRecord> = state.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Put a record back exactly as given, version included
    pub(crate) async fn restore(&self, record: WebhookRecord) {
        let mut state = self.state.write().await;
        state.take(&record.id);
        state.put(record);
    }

    pub(crate) async fn remove(&self, id: Uuid) -> Option<WebhookRecord> {
        self.state.write().await.take(&id)
    }

    /// Remove and return records in `statuses` created before `cutoff`
    pub(crate) async fn take_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[RecordStatus],
    ) -> Vec<WebhookRecord> {
        let mut state = self.state.write().await;
        let expired: Vec<Uuid> = state
            .records
            .values()
            .filter(|record| statuses.contains(&record.status) && record.created_at < cutoff)
            .map(|record| record.id)
            .collect();

        expired.iter().filter_map(|id| state.take(id)).collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: WebhookRecord) -> Result<WebhookRecord> {
        let mut state = self.state.write().await;
        if state.records.contains_key(&record.id) {
            return Err(WebhookError::Conflict(format!(
                "record {} already exists",
                record.id
            )));
        }
        state.put(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn list(&self, query: &ListQuery) -> Result<RecordPage> {
        let state = self.state.read().await;
        let lower = (query.tenant_id.clone(), DateTime::<Utc>::MIN_UTC, Uuid::nil());
        let upper = (query.tenant_id.clone(), DateTime::<Utc>::MAX_UTC, MAX_ID);

        let matching: Vec<&WebhookRecord> = state
            .by_tenant
            .range(lower..=upper)
            .rev()
            .filter_map(|(_, _, id)| state.records.get(id))
            .filter(|record| query.matches(record))
            .collect();

        let total = matching.len();
        let records = matching
            .into_iter()
            .skip(query.offset())
            .take(query.limit)
            .cloned()
            .collect();

        Ok(RecordPage {
            records,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    async fn due(&self, query: &DueQuery) -> Result<Vec<WebhookRecord>> {
        let state = self.state.read().await;
        // Records mid-attempt keep their index entry but must not use up the batch
        let idle = |(_, id): &&TimeKey| {
            state
                .records
                .get(id)
                .map_or(false, |record| !record.is_leased(query.now))
        };

        let mut keys: Vec<TimeKey> = state
            .retry_due
            .range(..=(query.now, MAX_ID))
            .filter(idle)
            .take(query.limit)
            .copied()
            .collect();
        keys.extend(
            state
                .pending
                .range(..=(query.pending_before, MAX_ID))
                .filter(idle)
                .take(query.limit)
                .copied(),
        );
        keys.sort();
        keys.truncate(query.limit);

        Ok(keys
            .into_iter()
            .filter_map(|(_, id)| state.records.get(&id).cloned())
            .collect())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        mut record: WebhookRecord,
    ) -> Result<SwapOutcome> {
        let mut state = self.state.write().await;
        let current_version = match state.records.get(&record.id) {
            Some(current) => current.version,
            None => return Ok(SwapOutcome::Missing),
        };
        if current_version != expected_version {
            return Ok(SwapOutcome::Stale);
        }

        state.take(&record.id);
        record.version = expected_version + 1;
        state.put(record.clone());
        Ok(SwapOutcome::Applied(record))
    }

    async fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[RecordStatus],
    ) -> Result<usize> {
        ensure_terminal(statuses)?;
        Ok(self.take_terminal_before(cutoff, statuses).await.len())
    }

    async fn stats(&self, tenant_id: Option<&str>) -> Result<RecordStats> {
        let state = self.state.read().await;
        let mut stats = RecordStats::default();
        state
            .records
            .values()
            .filter(|record| tenant_id.map_or(true, |tenant| record.tenant_id == tenant))
            .for_each(|record| stats.count(record.status));
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::record::{NewRecord, WebhookSource};
    use crate::webhooks::retry::RetryPolicy;
    use chrono::Duration;
    use serde_json::json;

    fn record(tenant: &str, source: WebhookSource, created_at: DateTime<Utc>) -> WebhookRecord {
        NewRecord::new(tenant, "payment.completed", source, json!({"n": 1}))
            .into_record(&RetryPolicy::default(), created_at)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryRecordStore::new();
        let r = record("org-1", WebhookSource::Stripe, Utc::now());
        store.insert(r.clone()).await.unwrap();

        assert_eq!(store.get(r.id).await.unwrap(), Some(r.clone()));
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
        assert!(matches!(
            store.insert(r).await,
            Err(WebhookError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_tenant_scoped_newest_first_and_paginated() {
        let store = MemoryRecordStore::new();
        let base = Utc::now();
        for i in 0..5 {
            store
                .insert(record("org-1", WebhookSource::Stripe, base + Duration::seconds(i)))
                .await
                .unwrap();
        }
        store
            .insert(record("org-2", WebhookSource::Stripe, base))
            .await
            .unwrap();

        let page = store.list(&ListQuery::new("org-1").page(1, 2)).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].created_at, base + Duration::seconds(4));
        assert_eq!(page.records[1].created_at, base + Duration::seconds(3));

        let last = store.list(&ListQuery::new("org-1").page(3, 2)).await.unwrap();
        assert_eq!(last.records.len(), 1);
        assert_eq!(last.records[0].created_at, base);

        let other = store.list(&ListQuery::new("org-2")).await.unwrap();
        assert_eq!(other.total, 1);
    }

    #[tokio::test]
    async fn test_list_filters_source_and_status() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();
        store.insert(record("org-1", WebhookSource::Stripe, now)).await.unwrap();
        store.insert(record("org-1", WebhookSource::Paypal, now)).await.unwrap();

        let mut failed = record("org-1", WebhookSource::Paypal, now);
        failed.status = RecordStatus::Failed;
        store.insert(failed).await.unwrap();

        let paypal = store
            .list(&ListQuery::new("org-1").source(WebhookSource::Paypal))
            .await
            .unwrap();
        assert_eq!(paypal.total, 2);

        let paypal_failed = store
            .list(
                &ListQuery::new("org-1")
                    .source(WebhookSource::Paypal)
                    .status(RecordStatus::Failed),
            )
            .await
            .unwrap();
        assert_eq!(paypal_failed.total, 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryRecordStore::new();
        let r = store
            .insert(record("org-1", WebhookSource::Stripe, Utc::now()))
            .await
            .unwrap();

        let mut changed = r.clone();
        changed.attempts = 1;
        let applied = match store.compare_and_swap(0, changed.clone()).await.unwrap() {
            SwapOutcome::Applied(record) => record,
            other => panic!("expected applied, got {:?}", other),
        };
        assert_eq!(applied.version, 1);
        assert_eq!(applied.attempts, 1);

        // Second writer with the old version loses
        assert_eq!(
            store.compare_and_swap(0, changed).await.unwrap(),
            SwapOutcome::Stale
        );

        let ghost = record("org-1", WebhookSource::Stripe, Utc::now());
        assert_eq!(
            store.compare_and_swap(0, ghost).await.unwrap(),
            SwapOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_due_selects_retrying_and_stale_pending() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();

        let mut due_retry = record("org-1", WebhookSource::Stripe, now);
        due_retry.status = RecordStatus::Retrying;
        due_retry.next_attempt_at = Some(now - Duration::minutes(1));

        let mut future_retry = record("org-1", WebhookSource::Stripe, now);
        future_retry.status = RecordStatus::Retrying;
        future_retry.next_attempt_at = Some(now + Duration::minutes(5));

        let old_pending = record("org-1", WebhookSource::Stripe, now - Duration::minutes(10));
        let fresh_pending = record("org-1", WebhookSource::Stripe, now);

        let mut done = record("org-1", WebhookSource::Stripe, now - Duration::days(1));
        done.status = RecordStatus::Success;

        for r in [&due_retry, &future_retry, &old_pending, &fresh_pending, &done] {
            store.insert(r.clone()).await.unwrap();
        }

        let due = store
            .due(&DueQuery {
                now,
                pending_before: now - Duration::minutes(1),
                limit: 10,
            })
            .await
            .unwrap();
        let ids: Vec<Uuid> = due.iter().map(|r| r.id).collect();

        assert_eq!(ids, vec![old_pending.id, due_retry.id]);
    }

    #[tokio::test]
    async fn test_due_respects_limit() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();
        for i in 0..10 {
            let mut r = record("org-1", WebhookSource::Stripe, now);
            r.status = RecordStatus::Retrying;
            r.next_attempt_at = Some(now - Duration::minutes(i));
            store.insert(r).await.unwrap();
        }

        let due = store
            .due(&DueQuery {
                now,
                pending_before: now,
                limit: 3,
            })
            .await
            .unwrap();
        assert_eq!(due.len(), 3);
    }

    #[tokio::test]
    async fn test_due_skips_leased_records_before_limit() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();

        // Two records mid-attempt sort ahead of the idle one
        for i in 0..2 {
            let mut leased = record("org-1", WebhookSource::Stripe, now);
            leased.status = RecordStatus::Retrying;
            leased.next_attempt_at = Some(now - Duration::minutes(10 - i));
            leased.lease_expires_at = Some(now + Duration::minutes(1));
            store.insert(leased).await.unwrap();
        }
        let mut idle = record("org-1", WebhookSource::Stripe, now);
        idle.status = RecordStatus::Retrying;
        idle.next_attempt_at = Some(now - Duration::minutes(1));
        store.insert(idle.clone()).await.unwrap();

        let mut expired = record("org-1", WebhookSource::Stripe, now);
        expired.status = RecordStatus::Retrying;
        expired.next_attempt_at = Some(now - Duration::seconds(30));
        expired.lease_expires_at = Some(now - Duration::seconds(1));
        store.insert(expired.clone()).await.unwrap();

        let due = store
            .due(&DueQuery {
                now,
                pending_before: now - Duration::hours(1),
                limit: 2,
            })
            .await
            .unwrap();
        let ids: Vec<Uuid> = due.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![idle.id, expired.id]);
    }

    #[tokio::test]
    async fn test_due_index_follows_swaps() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();
        let mut r = record("org-1", WebhookSource::Stripe, now);
        r.status = RecordStatus::Retrying;
        r.next_attempt_at = Some(now - Duration::minutes(1));
        let r = store.insert(r).await.unwrap();

        let mut rescheduled = r.clone();
        rescheduled.next_attempt_at = Some(now + Duration::minutes(5));
        store.compare_and_swap(r.version, rescheduled).await.unwrap();

        let due = store
            .due(&DueQuery {
                now,
                pending_before: now - Duration::hours(1),
                limit: 10,
            })
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_delete_terminal_before() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();
        let old = now - Duration::days(120);

        let mut old_success = record("org-1", WebhookSource::Stripe, old);
        old_success.status = RecordStatus::Success;
        let mut old_failed = record("org-1", WebhookSource::Stripe, old);
        old_failed.status = RecordStatus::Failed;
        let old_pending = record("org-1", WebhookSource::Stripe, old);
        let mut recent_failed = record("org-1", WebhookSource::Stripe, now);
        recent_failed.status = RecordStatus::Failed;

        for r in [&old_success, &old_failed, &old_pending, &recent_failed] {
            store.insert(r.clone()).await.unwrap();
        }

        let deleted = store
            .delete_terminal_before(
                now - Duration::days(90),
                &[RecordStatus::Success, RecordStatus::Failed],
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(store.get(old_pending.id).await.unwrap().is_some());
        assert!(store.get(recent_failed.id).await.unwrap().is_some());
        assert!(store.get(old_success.id).await.unwrap().is_none());

        let refused = store
            .delete_terminal_before(now, &[RecordStatus::Pending])
            .await;
        assert!(matches!(refused, Err(WebhookError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stats() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();
        store.insert(record("org-1", WebhookSource::Stripe, now)).await.unwrap();
        let mut failed = record("org-2", WebhookSource::Stripe, now);
        failed.status = RecordStatus::Failed;
        store.insert(failed).await.unwrap();

        let all = store.stats(None).await.unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.pending, 1);
        assert_eq!(all.failed, 1);

        let org1 = store.stats(Some("org-1")).await.unwrap();
        assert_eq!(org1.total, 1);
        assert_eq!(org1.failed, 0);
    }
}
