//! File-backed record store
//!
//! Keeps the working set in a [`MemoryRecordStore`] and writes the full record
//! set as a JSON array after every mutation (temp file + rename). Mutations
//! are serialised so snapshots land on disk in the order they were made. A
//! mutation whose write fails is rolled back in memory before the error is
//! returned, so memory never runs ahead of the file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ensure_terminal, DueQuery, ListQuery, MemoryRecordStore, RecordPage, RecordStats, RecordStore,
    SwapOutcome,
};
use crate::error::{Result, WebhookError};
use crate::webhooks::record::{RecordStatus, WebhookRecord};

/// JSON-file webhook record store
#[derive(Debug)]
pub struct FileRecordStore {
    path: PathBuf,
    inner: MemoryRecordStore,
    write_lock: Mutex<()>,
}

impl FileRecordStore {
    /// Open a store file, creating an empty store if the file does not exist
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Store` if the file exists but cannot be read or parsed.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let inner = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let records: Vec<WebhookRecord> = serde_json::from_slice(&bytes).map_err(|e| {
                    WebhookError::Store(format!("Failed to parse store file {:?}: {}", path, e))
                })?;
                info!(path = ?path, records = records.len(), "Loaded webhook record store");
                MemoryRecordStore::from_records(records)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?path, "Store file not found, starting empty");
                MemoryRecordStore::new()
            }
            Err(e) => {
                return Err(WebhookError::Store(format!(
                    "Failed to read store file {:?}: {}",
                    path, e
                )))
            }
        };

        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records = self.inner.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&records)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn insert(&self, record: WebhookRecord) -> Result<WebhookRecord> {
        let _guard = self.write_lock.lock().await;
        let record = self.inner.insert(record).await?;
        if let Err(e) = self.persist().await {
            warn!(record_id = %record.id, "Store write failed, dropping insert: {}", e);
            self.inner.remove(record.id).await;
            return Err(e);
        }
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookRecord>> {
        self.inner.get(id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<RecordPage> {
        self.inner.list(query).await
    }

    async fn due(&self, query: &DueQuery) -> Result<Vec<WebhookRecord>> {
        self.inner.due(query).await
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: WebhookRecord,
    ) -> Result<SwapOutcome> {
        let _guard = self.write_lock.lock().await;
        let previous = self.inner.get(record.id).await?;
        let outcome = self.inner.compare_and_swap(expected_version, record).await?;
        if let (SwapOutcome::Applied(applied), Some(previous)) = (&outcome, previous) {
            if let Err(e) = self.persist().await {
                warn!(record_id = %applied.id, "Store write failed, reverting update: {}", e);
                self.inner.restore(previous).await;
                return Err(e);
            }
        }
        Ok(outcome)
    }

    async fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[RecordStatus],
    ) -> Result<usize> {
        ensure_terminal(statuses)?;

        let _guard = self.write_lock.lock().await;
        let removed = self.inner.take_terminal_before(cutoff, statuses).await;
        if removed.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.persist().await {
            warn!(records = removed.len(), "Store write failed, keeping expired records: {}", e);
            for record in removed {
                self.inner.restore(record).await;
            }
            return Err(e);
        }
        Ok(removed.len())
    }

    async fn stats(&self, tenant_id: Option<&str>) -> Result<RecordStats> {
        self.inner.stats(tenant_id).await
    }
}
