//! Webhook Record Store
//!
//! Durable storage for webhook records. All state changes go through
//! [`RecordStore::compare_and_swap`], which only applies a write when the
//! stored version still matches the version the caller read.
//!
//! Two implementations are provided:
//!
//! - [`MemoryRecordStore`] keeps records in memory with ordered secondary
//!   indexes on `(tenant_id, created_at)`, `(next_attempt_at)` for retrying
//!   records and `(updated_at)` for pending records.
//! - [`FileRecordStore`] wraps the memory store and persists a JSON snapshot
//!   after every mutation.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{RecordStatus, WebhookRecord, WebhookSource};
use crate::error::{Result, WebhookError};

pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;

/// Default page size for listings
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Largest page size a listing may request
pub const MAX_PAGE_LIMIT: usize = 100;

/// Filtered, paginated listing for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub tenant_id: String,
    pub source: Option<WebhookSource>,
    pub status: Option<RecordStatus>,
    pub event_type: Option<String>,
    /// 1-based page number
    pub page: usize,
    pub limit: usize,
}

impl ListQuery {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source: None,
            status: None,
            event_type: None,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn source(mut self, source: WebhookSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn page(mut self, page: usize, limit: usize) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(WebhookError::Validation("tenant_id is required".to_string()));
        }
        if self.page == 0 {
            return Err(WebhookError::Validation("page must be >= 1".to_string()));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(WebhookError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        Ok(())
    }

    /// Whether a record passes the optional filters
    pub fn matches(&self, record: &WebhookRecord) -> bool {
        record.tenant_id == self.tenant_id
            && self.source.map_or(true, |source| record.source == source)
            && self.status.map_or(true, |status| record.status == status)
            && self
                .event_type
                .as_deref()
                .map_or(true, |event_type| record.event_type == event_type)
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// One page of a listing, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<WebhookRecord>,
    /// Records matching the filters across all pages
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

/// Selection of records the sweeper should attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueQuery {
    /// `retrying` records with `next_attempt_at <= now` are due
    pub now: DateTime<Utc>,
    /// `pending` records last touched at or before this instant are due
    pub pending_before: DateTime<Utc>,
    pub limit: usize,
}

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq)]
pub enum SwapOutcome {
    /// Write applied; carries the stored record with its new version
    Applied(WebhookRecord),
    /// Stored version no longer matches the expected one
    Stale,
    /// No record with that id
    Missing,
}

/// Per-status record counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordStats {
    pub total: usize,
    pub pending: usize,
    pub retrying: usize,
    pub success: usize,
    pub failed: usize,
}

impl RecordStats {
    pub(crate) fn count(&mut self, status: RecordStatus) {
        self.total += 1;
        match status {
            RecordStatus::Pending => self.pending += 1,
            RecordStatus::Retrying => self.retrying += 1,
            RecordStatus::Success => self.success += 1,
            RecordStatus::Failed => self.failed += 1,
        }
    }
}

/// Storage backend for webhook records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record; fails with `Conflict` if the id already exists
    async fn insert(&self, record: WebhookRecord) -> Result<WebhookRecord>;

    /// Point lookup by id
    async fn get(&self, id: Uuid) -> Result<Option<WebhookRecord>>;

    /// Filtered, paginated listing sorted by `created_at` descending
    async fn list(&self, query: &ListQuery) -> Result<RecordPage>;

    /// Records due for a scheduled attempt, oldest due first
    async fn due(&self, query: &DueQuery) -> Result<Vec<WebhookRecord>>;

    /// Replace the record only if its stored version equals `expected_version`
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: WebhookRecord,
    ) -> Result<SwapOutcome>;

    /// Delete records in one of `statuses` created before `cutoff`.
    /// Only terminal statuses are accepted.
    async fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[RecordStatus],
    ) -> Result<usize>;

    /// Per-status counts, optionally for a single tenant
    async fn stats(&self, tenant_id: Option<&str>) -> Result<RecordStats>;
}

pub(crate) fn ensure_terminal(statuses: &[RecordStatus]) -> Result<()> {
    if let Some(status) = statuses.iter().find(|status| !status.is_terminal()) {
        return Err(WebhookError::Validation(format!(
            "cleanup may only target terminal statuses, got {}",
            status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_validation() {
        assert!(ListQuery::new("org-1").validate().is_ok());
        assert!(ListQuery::new("").validate().is_err());
        assert!(ListQuery::new("org-1").page(0, 10).validate().is_err());
        assert!(ListQuery::new("org-1").page(1, 0).validate().is_err());
        assert!(ListQuery::new("org-1").page(1, MAX_PAGE_LIMIT + 1).validate().is_err());
    }

    #[test]
    fn test_list_query_offset() {
        assert_eq!(ListQuery::new("org-1").page(1, 20).offset(), 0);
        assert_eq!(ListQuery::new("org-1").page(3, 20).offset(), 40);
    }

    #[test]
    fn test_ensure_terminal() {
        assert!(ensure_terminal(&[RecordStatus::Success, RecordStatus::Failed]).is_ok());
        assert!(ensure_terminal(&[RecordStatus::Failed, RecordStatus::Retrying]).is_err());
    }
}
