//! Persisted job and schedule records.

use crate::document::{JobOptions, RepeatOptions};
use crate::types::{JobId, JobKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document snapshot plus output accumulated while the job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// The submitted document as YAML
    pub document: String,
    /// Output written by the job (`stdout`, `stderr`, `update` calls)
    #[serde(default)]
    pub data: JsonMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub payload: JobPayload,
    #[serde(default)]
    pub return_value: Option<JsonValue>,
    #[serde(default)]
    pub failed_reason: Option<String>,
    /// One entry per failed attempt
    #[serde(default)]
    pub stacktrace: Vec<String>,
    #[serde(default)]
    pub options: JobOptions,
    /// Enqueue order within the queue
    pub seq: u64,
    pub created_at: u64,
    #[serde(default)]
    pub processed_at: Option<u64>,
    #[serde(default)]
    pub finished_at: Option<u64>,
    /// Earliest time the job may be claimed
    pub process_at: u64,
    /// Schedule that materialized this job, if any
    #[serde(default)]
    pub repeat_key: Option<String>,
}

/// A job about to be enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub kind: JobKind,
    pub document: String,
    pub options: JobOptions,
    /// Explicit id; generated from the queue sequence when absent
    pub id: Option<JobId>,
    pub repeat_key: Option<String>,
}

/// A recurring job declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub key: String,
    pub queue: String,
    pub kind: JobKind,
    pub document: String,
    /// Options applied to every materialized instance
    pub options: JobOptions,
    pub repeat: RepeatOptions,
    #[serde(default)]
    pub job_id: Option<String>,
    /// Next fire time in epoch millis
    pub next_run: u64,
    /// Instances materialized so far
    #[serde(default)]
    pub count: u32,
    pub created_at: u64,
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Job(JobRecord),
    Scheduled(ScheduleRecord),
}

impl Submission {
    /// Job id, or schedule key for recurring submissions.
    pub fn id(&self) -> &str {
        match self {
            Submission::Job(record) => &record.id,
            Submission::Scheduled(schedule) => &schedule.key,
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            Submission::Job(record) => &record.queue,
            Submission::Scheduled(schedule) => &schedule.queue,
        }
    }

    pub fn job(&self) -> Option<&JobRecord> {
        match self {
            Submission::Job(record) => Some(record),
            Submission::Scheduled(_) => None,
        }
    }
}

/// Jobs and schedules of one queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueListing {
    pub jobs: Vec<JobId>,
    pub repeat_jobs: Vec<ScheduleRecord>,
}
