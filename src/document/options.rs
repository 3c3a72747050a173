//! Submission options (`option` field of a job document).

use crate::document::value::DocValue;
use crate::error::DocumentError;
use serde::{Deserialize, Serialize};

/// Options applied when a document is enqueued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    /// Lower values are claimed first; unset counts as 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// Milliseconds before the job becomes claimable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// Total backend-level attempts (at least 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
    /// Claim newest first among jobs of equal priority
    pub lifo: bool,
    /// Milliseconds an attempt may run before it fails with a timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_on_complete: Option<Retention>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_on_fail: Option<Retention>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Delay between backend-level attempts.
///
/// Accepts either a bare number (fixed delay in ms) or `{type, delay}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BackoffRepr")]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    pub delay: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BackoffRepr {
    Delay(u64),
    Spec {
        #[serde(rename = "type")]
        kind: BackoffKind,
        #[serde(default)]
        delay: u64,
    },
}

impl From<BackoffRepr> for Backoff {
    fn from(repr: BackoffRepr) -> Self {
        match repr {
            BackoffRepr::Delay(delay) => Backoff {
                kind: BackoffKind::Fixed,
                delay,
            },
            BackoffRepr::Spec { kind, delay } => Backoff { kind, delay },
        }
    }
}

impl Backoff {
    /// Delay before the next attempt, given how many attempts have been made so far.
    pub fn delay_for(&self, attempts_made: u32) -> u64 {
        match self.kind {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                self.delay.saturating_mul(1u64 << exponent)
            }
        }
    }
}

/// Retention of finished jobs: `true` removes them, a number keeps the most recent N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Retention {
    Remove(bool),
    Keep(usize),
}

/// Recurring schedule declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepeatOptions {
    /// Cron expression with 5 or 6 fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Fixed interval in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub every: Option<u64>,
    /// IANA time zone for cron evaluation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    #[serde(alias = "start_date", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateSpec>,
    #[serde(alias = "end_date", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateSpec>,
    /// Maximum number of instances to materialize
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Instances already made, counted against `limit`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// A point in time given as epoch millis or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateSpec {
    Millis(u64),
    Text(String),
}

impl DateSpec {
    pub fn to_millis(&self) -> Result<u64, String> {
        match self {
            DateSpec::Millis(ms) => Ok(*ms),
            DateSpec::Text(text) => chrono::DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.timestamp_millis().max(0) as u64)
                .map_err(|e| format!("invalid date '{}': {}", text, e)),
        }
    }
}

impl RepeatOptions {
    pub fn start_millis(&self) -> Result<Option<u64>, String> {
        self.start_date.as_ref().map(DateSpec::to_millis).transpose()
    }

    pub fn end_millis(&self) -> Result<Option<u64>, String> {
        self.end_date.as_ref().map(DateSpec::to_millis).transpose()
    }
}

impl JobOptions {
    /// Read options from the document's `option` value (absent means defaults).
    pub fn from_value(value: Option<&DocValue>) -> Result<Self, DocumentError> {
        let options = match value {
            None | Some(DocValue::Null) => JobOptions::default(),
            Some(value @ DocValue::Map(_)) => serde_json::from_value(value.to_json())
                .map_err(|e| DocumentError::InvalidOptions(e.to_string()))?,
            Some(other) => {
                return Err(DocumentError::InvalidOptions(format!(
                    "expected a map, found {}",
                    other.type_name()
                )))
            }
        };
        options.validate()?;
        Ok(options)
    }

    /// Check option combinations that serde cannot express.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.attempts == Some(0) {
            return Err(DocumentError::InvalidOptions(
                "attempts must be at least 1".to_string(),
            ));
        }
        if let Some(job_id) = &self.job_id {
            if job_id.is_empty() {
                return Err(DocumentError::InvalidOptions(
                    "jobId must not be empty".to_string(),
                ));
            }
            if job_id.starts_with("repeat:") {
                return Err(DocumentError::InvalidOptions(
                    "jobId must not use the reserved 'repeat:' prefix".to_string(),
                ));
            }
        }
        if let Some(repeat) = &self.repeat {
            crate::queue::schedule::validate_repeat(repeat).map_err(DocumentError::InvalidOptions)?;
        }
        Ok(())
    }

    pub fn max_attempts(&self) -> u32 {
        self.attempts.unwrap_or(1).max(1)
    }
}
