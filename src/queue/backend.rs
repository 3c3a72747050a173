//! Queue backend interface.

use crate::error::BackendError;
use crate::queue::record::{JobRecord, NewJob, ScheduleRecord};
use crate::types::JobId;
use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Durable storage for named queues.
///
/// Implementations must make [`QueueBackend::claim_next`] atomic: a job is handed to at
/// most one caller per attempt.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Add `name` to the durable queue index. Returns `true` when it was not known yet.
    async fn register_queue(&self, name: &str) -> Result<bool, BackendError>;

    async fn queue_names(&self) -> Result<Vec<String>, BackendError>;

    /// Persist a new job. An explicit id that already exists returns the existing job.
    async fn enqueue(&self, job: NewJob, now: u64) -> Result<JobRecord, BackendError>;

    /// Claim the best due job and mark it active.
    async fn claim_next(&self, queue: &str, now: u64) -> Result<Option<JobRecord>, BackendError>;

    /// Earliest time a delayed job becomes due.
    async fn next_wakeup(&self, queue: &str) -> Result<Option<u64>, BackendError>;

    async fn get_job(&self, queue: &str, id: &str) -> Result<Option<JobRecord>, BackendError>;

    async fn update_job(&self, record: &JobRecord) -> Result<(), BackendError>;

    async fn remove_job(&self, queue: &str, id: &str) -> Result<bool, BackendError>;

    /// All jobs of a queue in enqueue order.
    async fn list_jobs(&self, queue: &str) -> Result<Vec<JobRecord>, BackendError>;

    /// Shallow-merge keys into the job's payload data.
    async fn merge_data(
        &self,
        queue: &str,
        id: &str,
        data: JsonMap<String, JsonValue>,
    ) -> Result<(), BackendError>;

    /// Append text to a string entry of the payload data.
    async fn append_data(
        &self,
        queue: &str,
        id: &str,
        key: &str,
        chunk: &str,
    ) -> Result<(), BackendError>;

    async fn put_schedule(&self, schedule: &ScheduleRecord) -> Result<(), BackendError>;

    async fn get_schedule(
        &self,
        queue: &str,
        key: &str,
    ) -> Result<Option<ScheduleRecord>, BackendError>;

    async fn list_schedules(&self, queue: &str) -> Result<Vec<ScheduleRecord>, BackendError>;

    async fn remove_schedule(&self, queue: &str, key: &str) -> Result<bool, BackendError>;

    /// Return jobs left `active` by a previous process to `waiting`.
    async fn recover_stalled(&self, queue: &str) -> Result<Vec<JobId>, BackendError>;
}
