//! Record State Machine
//!
//! Pure transitions between record states. Each function takes the current
//! record and returns the next one; nothing here touches the store. The
//! caller persists the result with a compare-and-swap against the version it
//! read, so a concurrent writer can never be silently overwritten.
//!
//! ```text
//!   pending ──success──► success ◄──success── retrying ◄─┐
//!      │                                         │  │     │ fail, attempts left
//!      ├──fail, attempts left──────────────────►─┘  └─────┘
//!      └──fail, exhausted──► failed ◄──fail, exhausted──┘
//!
//!   success / failed ──replay──► pending (attempts = 0)
//! ```

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use super::record::{DeliveryAttempt, LastResult, RecordStatus, WebhookRecord};
use super::retry::{plan_retry, RetryDecision};
use crate::error::{Result, WebhookError};

/// Message stored when an attempt never reported back
pub const INTERRUPTED_MESSAGE: &str = "attempt interrupted before completion";

/// How an attempt was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptMode {
    /// Sweeper retry: honours `next_attempt_at`
    Scheduled,
    /// `process_now`: bypasses the schedule
    Immediate,
}

/// Why a record cannot be attempted right now
#[derive(Debug, Clone, PartialEq)]
pub enum Ineligible {
    /// Record is `success` or `failed`
    Terminal(RecordStatus),
    /// Scheduled attempt requested before `next_attempt_at`
    NotDue(DateTime<Utc>),
    /// Another attempt holds the lease until the given time
    InFlight(DateTime<Utc>),
    /// Non-terminal record with no attempts left (interrupted final attempt)
    Exhausted,
    /// Record changed between read and write
    Stale,
}

impl Ineligible {
    /// Short label used for metrics and logs
    pub fn reason(&self) -> &'static str {
        match self {
            Ineligible::Terminal(_) => "terminal",
            Ineligible::NotDue(_) => "not_due",
            Ineligible::InFlight(_) => "in_flight",
            Ineligible::Exhausted => "exhausted",
            Ineligible::Stale => "stale",
        }
    }
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligible::Terminal(status) => write!(f, "record is already {}", status),
            Ineligible::NotDue(at) => write!(f, "next attempt is not due until {}", at),
            Ineligible::InFlight(until) => write!(f, "an attempt is in flight until {}", until),
            Ineligible::Exhausted => f.write_str("record has no attempts left"),
            Ineligible::Stale => f.write_str("record was modified concurrently"),
        }
    }
}

/// Start an attempt: count it, stamp `last_attempt_at` and take the lease.
///
/// The attempt is counted up front so an attempt that never reports back
/// (crash, lost process) is still reflected in `attempts`.
pub fn begin_attempt(
    record: &WebhookRecord,
    mode: AttemptMode,
    now: DateTime<Utc>,
    lease: Duration,
) -> std::result::Result<WebhookRecord, Ineligible> {
    if record.status.is_terminal() {
        return Err(Ineligible::Terminal(record.status));
    }
    if let Some(until) = record.lease_expires_at.filter(|until| *until > now) {
        return Err(Ineligible::InFlight(until));
    }
    if record.attempts >= record.max_attempts {
        return Err(Ineligible::Exhausted);
    }
    if mode == AttemptMode::Scheduled && record.status == RecordStatus::Retrying {
        if let Some(next) = record.next_attempt_at.filter(|next| *next > now) {
            return Err(Ineligible::NotDue(next));
        }
    }

    let mut next = record.clone();
    next.attempts += 1;
    next.last_attempt_at = Some(now);
    next.lease_expires_at = Some(now + lease);
    next.updated_at = now;
    Ok(next)
}

/// Seal a successful attempt
pub fn complete_success(
    begun: &WebhookRecord,
    result: LastResult,
    now: DateTime<Utc>,
    duration_ms: u64,
) -> WebhookRecord {
    let mut next = begun.clone();
    next.push_history(attempt_entry(begun, &result, duration_ms, RecordStatus::Success));
    next.status = RecordStatus::Success;
    next.processed_at = Some(now);
    next.processing_duration_ms = Some(duration_ms);
    next.last_result = Some(result);
    next.next_attempt_at = None;
    next.lease_expires_at = None;
    next.updated_at = now;
    next
}

/// Record a failed attempt and schedule the next one, or fail terminally
pub fn complete_failure(
    begun: &WebhookRecord,
    result: LastResult,
    now: DateTime<Utc>,
    duration_ms: u64,
) -> WebhookRecord {
    let decision = plan_retry(
        begun.attempts,
        begun.max_attempts,
        &begun.backoff_schedule_minutes,
        now,
    );

    let mut next = begun.clone();
    match decision {
        RetryDecision::Retry {
            next_attempt_at, ..
        } => {
            next.status = RecordStatus::Retrying;
            next.next_attempt_at = Some(next_attempt_at);
        }
        RetryDecision::GiveUp => {
            next.status = RecordStatus::Failed;
            next.next_attempt_at = None;
        }
    }
    next.push_history(attempt_entry(begun, &result, duration_ms, next.status));
    next.last_result = Some(result);
    next.lease_expires_at = None;
    next.updated_at = now;
    next
}

/// Fail a non-terminal record whose final attempt never reported back
pub fn seal_exhausted(record: &WebhookRecord, now: DateTime<Utc>) -> WebhookRecord {
    let mut next = record.clone();
    next.status = RecordStatus::Failed;
    next.next_attempt_at = None;
    next.lease_expires_at = None;
    next.last_result = Some(LastResult {
        status_code: None,
        message: Some(INTERRUPTED_MESSAGE.to_string()),
        response_body: None,
    });
    next.updated_at = now;
    next
}

/// Reset a terminal record to a fresh `pending` state
///
/// # Errors
///
/// Returns `WebhookError::Conflict` if the record is `pending` or `retrying`.
pub fn reset_for_replay(record: &WebhookRecord, now: DateTime<Utc>) -> Result<WebhookRecord> {
    if !record.status.is_terminal() {
        return Err(WebhookError::Conflict(format!(
            "cannot replay record {} while it is {}",
            record.id, record.status
        )));
    }

    let mut next = record.clone();
    next.status = RecordStatus::Pending;
    next.attempts = 0;
    next.last_result = None;
    next.next_attempt_at = None;
    next.lease_expires_at = None;
    next.processed_at = None;
    next.processing_duration_ms = None;
    next.replay_count += 1;
    next.updated_at = now;
    Ok(next)
}

fn attempt_entry(
    begun: &WebhookRecord,
    result: &LastResult,
    duration_ms: u64,
    outcome: RecordStatus,
) -> DeliveryAttempt {
    DeliveryAttempt {
        attempt_number: begun.attempts,
        started_at: begun.last_attempt_at.unwrap_or(begun.updated_at),
        status_code: result.status_code,
        error: result.message.clone(),
        duration_ms,
        outcome,
    }
}
