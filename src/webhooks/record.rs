//! Webhook Record Model
//!
//! The durable record of every webhook seen, plus its delivery and
//! processing lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::retry::RetryPolicy;
use crate::error::{Result, WebhookError};

/// Maximum number of attempt entries kept in a record's history
pub const MAX_HISTORY_ENTRIES: usize = 50;

const MAX_EVENT_TYPE_LEN: usize = 200;

/// Lifecycle status of a webhook record
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Created (or replayed), no attempt has concluded yet
    Pending,
    /// Has a scheduled future attempt
    Retrying,
    /// Processed successfully
    Success,
    /// Attempts exhausted
    Failed,
}

impl RecordStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [RecordStatus; 4] = [
        RecordStatus::Pending,
        RecordStatus::Retrying,
        RecordStatus::Success,
        RecordStatus::Failed,
    ];

    /// Terminal statuses receive no further automatic transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Success | RecordStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Retrying => "retrying",
            RecordStatus::Success => "success",
            RecordStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self> {
        RecordStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| WebhookError::Validation(format!("Unknown record status: {}", s)))
    }
}

/// Origin system of a webhook
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSource {
    Pgpay,
    Stripe,
    Paypal,
    Reloadly,
    Dingconnect,
    Other,
}

impl WebhookSource {
    pub const ALL: [WebhookSource; 6] = [
        WebhookSource::Pgpay,
        WebhookSource::Stripe,
        WebhookSource::Paypal,
        WebhookSource::Reloadly,
        WebhookSource::Dingconnect,
        WebhookSource::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookSource::Pgpay => "pgpay",
            WebhookSource::Stripe => "stripe",
            WebhookSource::Paypal => "paypal",
            WebhookSource::Reloadly => "reloadly",
            WebhookSource::Dingconnect => "dingconnect",
            WebhookSource::Other => "other",
        }
    }
}

impl fmt::Display for WebhookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookSource {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self> {
        WebhookSource::ALL
            .into_iter()
            .find(|source| source.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| WebhookError::Validation(format!("Unknown webhook source: {}", s)))
    }
}

/// Request metadata kept for audit; never interpreted by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestMeta {
    pub headers: HashMap<String, String>,
    pub signature: Option<String>,
    pub origin_ip: Option<String>,
}

/// Foreign references carried through for cross-referencing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Correlation {
    pub transaction_id: Option<String>,
    pub customer_id: Option<String>,
}

/// Outcome of the most recent attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastResult {
    /// HTTP-like result code, when the handler produced one
    pub status_code: Option<u16>,
    /// Error message for failed attempts
    pub message: Option<String>,
    /// Response body for successful attempts
    pub response_body: Option<String>,
}

/// One entry in a record's attempt history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Status the record moved to because of this attempt
    pub outcome: RecordStatus,
}

/// A webhook event and its delivery bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub event_type: String,
    pub source: WebhookSource,
    pub payload: serde_json::Value,
    pub request_meta: Option<RequestMeta>,
    pub status: RecordStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff_schedule_minutes: Vec<u32>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_result: Option<LastResult>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_duration_ms: Option<u64>,
    pub correlation: Option<Correlation>,
    /// Set while an attempt is in flight
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<DeliveryAttempt>,
    #[serde(default)]
    pub replay_count: u32,
    /// Optimistic concurrency token, assigned by the store
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookRecord {
    /// Whether an attempt currently holds this record
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_some_and(|until| until > now)
    }

    /// Append an attempt to the history, dropping the oldest entries past the cap
    pub fn push_history(&mut self, attempt: DeliveryAttempt) {
        self.history.push(attempt);
        if self.history.len() > MAX_HISTORY_ENTRIES {
            let excess = self.history.len() - MAX_HISTORY_ENTRIES;
            self.history.drain(0..excess);
        }
    }

    /// Check the record-level invariants
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.attempts > self.max_attempts {
            return Err(format!(
                "attempts {} exceeds max_attempts {}",
                self.attempts, self.max_attempts
            ));
        }
        match self.status {
            RecordStatus::Retrying => {
                let next = self
                    .next_attempt_at
                    .ok_or_else(|| "retrying record has no next_attempt_at".to_string())?;
                if let Some(last) = self.last_attempt_at {
                    if next <= last {
                        return Err("next_attempt_at is not after last_attempt_at".to_string());
                    }
                }
            }
            RecordStatus::Success | RecordStatus::Failed => {
                if self.next_attempt_at.is_some() {
                    return Err(format!("{} record still has next_attempt_at", self.status));
                }
                if self.lease_expires_at.is_some() {
                    return Err(format!("{} record still holds a lease", self.status));
                }
            }
            RecordStatus::Pending => {}
        }
        if self.status == RecordStatus::Success && self.processed_at.is_none() {
            return Err("success record has no processed_at".to_string());
        }
        Ok(())
    }
}

/// Creation input for a webhook record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub tenant_id: String,
    pub event_type: String,
    pub source: WebhookSource,
    pub payload: serde_json::Value,
    pub request_meta: Option<RequestMeta>,
    pub correlation: Option<Correlation>,
    /// Overrides the engine's default retry policy for this record only
    pub policy: Option<RetryPolicy>,
}

impl NewRecord {
    pub fn new(
        tenant_id: impl Into<String>,
        event_type: impl Into<String>,
        source: WebhookSource,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            event_type: event_type.into(),
            source,
            payload,
            request_meta: None,
            correlation: None,
            policy: None,
        }
    }

    pub fn with_request_meta(mut self, meta: RequestMeta) -> Self {
        self.request_meta = Some(meta);
        self
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validate creation input
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Validation` for a blank tenant or event type,
    /// an oversized event type, a null payload, or an invalid policy override.
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(WebhookError::Validation("tenant_id is required".to_string()));
        }
        if self.event_type.trim().is_empty() {
            return Err(WebhookError::Validation("event_type is required".to_string()));
        }
        if self.event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(WebhookError::Validation(format!(
                "event_type must be at most {} characters",
                MAX_EVENT_TYPE_LEN
            )));
        }
        if self.payload.is_null() {
            return Err(WebhookError::Validation("payload is required".to_string()));
        }
        if let Some(policy) = &self.policy {
            policy.validate()?;
        }
        Ok(())
    }

    /// Build the initial `pending` record, copying the effective retry policy
    /// into it so later changes to defaults never affect existing records.
    pub fn into_record(self, default_policy: &RetryPolicy, now: DateTime<Utc>) -> WebhookRecord {
        let policy = self.policy.unwrap_or_else(|| default_policy.clone());
        WebhookRecord {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            event_type: self.event_type,
            source: self.source,
            payload: self.payload,
            request_meta: self.request_meta,
            status: RecordStatus::Pending,
            attempts: 0,
            max_attempts: policy.max_attempts,
            backoff_schedule_minutes: policy.backoff_schedule_minutes,
            next_attempt_at: None,
            last_attempt_at: None,
            last_result: None,
            processed_at: None,
            processing_duration_ms: None,
            correlation: self.correlation,
            lease_expires_at: None,
            history: Vec::new(),
            replay_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
