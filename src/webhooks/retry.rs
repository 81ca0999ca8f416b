// Backoff-table retry scheduling for webhook records
//
// Implements retry strategy with:
// - A fixed, per-record backoff table in minutes (default 1m, 5m, 15m, 60m, 360m)
// - Maximum 6 attempts by default
// - Reuse of the final table entry once attempts run past the table
// - Terminality decided purely from the attempt count

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WebhookError};

/// Default attempt ceiling for new records
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Default backoff table in minutes
pub const DEFAULT_BACKOFF_SCHEDULE_MINUTES: [u32; 5] = [1, 5, 15, 60, 360];

/// Retry policy copied into each record at creation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed before the record is terminally failed (default 6)
    pub max_attempts: u32,
    /// Delay before each retry, indexed by attempts already made
    pub backoff_schedule_minutes: Vec<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_schedule_minutes: DEFAULT_BACKOFF_SCHEDULE_MINUTES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_schedule_minutes: Vec<u32>) -> Self {
        Self {
            max_attempts,
            backoff_schedule_minutes,
        }
    }

    /// Validate the policy
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Validation` if `max_attempts` is zero, the table is
    /// empty, any entry is zero, or the table ever decreases.
    pub fn validate(&self) -> Result<()> {
        validate_schedule(self.max_attempts, &self.backoff_schedule_minutes)
            .map_err(WebhookError::Validation)
    }
}

/// Shared validation used by both policies and the config file
pub fn validate_schedule(max_attempts: u32, schedule: &[u32]) -> std::result::Result<(), String> {
    if max_attempts == 0 {
        return Err("max_attempts must be >= 1".to_string());
    }
    if schedule.is_empty() {
        return Err("backoff schedule must not be empty".to_string());
    }
    if schedule.iter().any(|&minutes| minutes == 0) {
        return Err("backoff schedule entries must be >= 1 minute".to_string());
    }
    if schedule.windows(2).any(|pair| pair[1] < pair[0]) {
        return Err("backoff schedule must be non-decreasing".to_string());
    }
    Ok(())
}

/// Retry decision after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Retry after `delay_minutes`, at `next_attempt_at`
    Retry {
        delay_minutes: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Attempts exhausted, the record is terminally failed
    GiveUp,
}

/// Delay in minutes for the next attempt
///
/// The table is indexed by `attempts` (the count *before* the failed attempt
/// was added). Past the end of the table the final entry is reused, so the
/// worst-case delay never grows beyond the last configured value.
pub fn backoff_delay_minutes(attempts: u32, schedule: &[u32]) -> u32 {
    schedule
        .get(attempts as usize)
        .or_else(|| schedule.last())
        .copied()
        .unwrap_or(0)
}

/// Decide what follows a failed attempt
///
/// # Arguments
/// * `attempts_made` - Attempt count *after* the failed attempt was counted
/// * `max_attempts` - The record's attempt ceiling
/// * `schedule` - The record's backoff table
/// * `now` - When the failed attempt concluded
pub fn plan_retry(
    attempts_made: u32,
    max_attempts: u32,
    schedule: &[u32],
    now: DateTime<Utc>,
) -> RetryDecision {
    if attempts_made >= max_attempts {
        debug!(attempts_made, max_attempts, "Max attempts reached, giving up");
        return RetryDecision::GiveUp;
    }

    let delay_minutes = backoff_delay_minutes(attempts_made.saturating_sub(1), schedule);
    let next_attempt_at = now + Duration::minutes(i64::from(delay_minutes));

    debug!(
        attempts_made,
        delay_minutes,
        next_attempt_at = %next_attempt_at,
        "Scheduling retry"
    );

    RetryDecision::Retry {
        delay_minutes,
        next_attempt_at,
    }
}
