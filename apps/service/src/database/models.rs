use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::{CheckStatus, ProbeOutcome};

/// Default probe interval for newly registered targets
pub const DEFAULT_CHECK_INTERVAL_SECONDS: u32 = 60;

/// Target model - a monitored endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    /// Normalized URL, unique across targets
    pub url: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub check_interval_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A target that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTarget {
    pub url: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub check_interval_seconds: u32,
    pub created_at: DateTime<Utc>,
}

impl NewTarget {
    pub fn new(url: String, name: Option<String>, check_interval_seconds: u32) -> Self {
        Self { url, name, is_active: true, check_interval_seconds, created_at: Utc::now() }
    }
}

/// Changes requested for a target. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetUpdate {
    pub url: Option<String>,
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub check_interval_seconds: Option<u32>,
}

impl TargetUpdate {
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.name.is_none()
            && self.is_active.is_none()
            && self.check_interval_seconds.is_none()
    }
}

impl Target {
    /// Build the replacement value for this target. `self` is left as it was,
    /// so callers holding the old value never observe a partial update.
    pub fn with_update(&self, update: &TargetUpdate, now: DateTime<Utc>) -> Target {
        Target {
            id: self.id,
            url: update.url.clone().unwrap_or_else(|| self.url.clone()),
            name: update.name.clone().or_else(|| self.name.clone()),
            is_active: update.is_active.unwrap_or(self.is_active),
            check_interval_seconds: update
                .check_interval_seconds
                .unwrap_or(self.check_interval_seconds),
            created_at: self.created_at,
            updated_at: now,
        }
    }
}

/// CheckRecord model - one immutable probe observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: i64,
    pub target_id: i64,
    pub checked_at: DateTime<Utc>,
    pub status: CheckStatus,
    pub http_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

/// A check record about to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCheckRecord {
    pub target_id: i64,
    pub checked_at: DateTime<Utc>,
    pub status: CheckStatus,
    pub http_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

impl NewCheckRecord {
    pub fn from_outcome(target_id: i64, checked_at: DateTime<Utc>, outcome: &ProbeOutcome) -> Self {
        Self {
            target_id,
            checked_at,
            status: outcome.status,
            http_code: outcome.http_code,
            response_time_ms: outcome.latency_ms,
            error: outcome.error.clone(),
        }
    }

    pub fn into_record(self, id: i64) -> CheckRecord {
        CheckRecord {
            id,
            target_id: self.target_id,
            checked_at: self.checked_at,
            status: self.status,
            http_code: self.http_code,
            response_time_ms: self.response_time_ms,
            error: self.error,
        }
    }
}

/// Timestamps are stored as Unix milliseconds
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
