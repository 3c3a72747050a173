//! Durable sled-backed queue store.
//!
//! Layout: a `queues` tree indexes queue names; every queue owns a `jobs/<name>` tree of
//! JSON job records keyed by id and a `repeat/<name>` tree of schedules keyed by
//! schedule key. Per-queue sequence counters live in `queue_seq`.

use crate::error::BackendError;
use crate::queue::backend::QueueBackend;
use crate::queue::record::{JobPayload, JobRecord, JobStatus, NewJob, ScheduleRecord};
use crate::types::JobId;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use sled::{Db, Tree};
use std::path::Path;

const TREE_QUEUES: &str = "queues";
const TREE_SEQ: &str = "queue_seq";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueEntry {
    name: String,
    registered_at: u64,
}

pub struct SledQueueBackend {
    db: Db,
    queues: Tree,
    seq: Tree,
    /// Serializes read-modify-write cycles on job records
    write_lock: Mutex<()>,
}

impl SledQueueBackend {
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<Self, BackendError> {
        let queues = db.open_tree(TREE_QUEUES)?;
        let seq = db.open_tree(TREE_SEQ)?;
        Ok(Self {
            db,
            queues,
            seq,
            write_lock: Mutex::new(()),
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    fn jobs(&self, queue: &str) -> Result<Tree, BackendError> {
        Ok(self.db.open_tree(format!("jobs/{}", queue))?)
    }

    fn schedules(&self, queue: &str) -> Result<Tree, BackendError> {
        Ok(self.db.open_tree(format!("repeat/{}", queue))?)
    }

    fn next_seq(&self, queue: &str) -> Result<u64, BackendError> {
        let updated = self.seq.update_and_fetch(queue.as_bytes(), |old| {
            let current = old
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;
        updated
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_ref()).ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| BackendError::Corrupt(format!("sequence counter for '{}'", queue)))
    }

    fn read_job(tree: &Tree, id: &str) -> Result<Option<JobRecord>, BackendError> {
        read(tree, id)
    }

    fn write_job(tree: &Tree, record: &JobRecord) -> Result<(), BackendError> {
        write(tree, &record.id, record)
    }

    fn modify_job<F>(&self, queue: &str, id: &str, change: F) -> Result<(), BackendError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let tree = self.jobs(queue)?;
        let _guard = self.write_lock.lock();
        let mut record = Self::read_job(&tree, id)?.ok_or_else(|| {
            BackendError::Storage(format!("job {}[{}] does not exist", queue, id))
        })?;
        change(&mut record);
        Self::write_job(&tree, &record)
    }
}

fn read<T: DeserializeOwned>(tree: &Tree, key: &str) -> Result<Option<T>, BackendError> {
    let Some(raw) = tree.get(key.as_bytes())? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&raw)?))
}

fn write<T: Serialize>(tree: &Tree, key: &str, value: &T) -> Result<(), BackendError> {
    let bytes = serde_json::to_vec(value)?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn read_all<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, BackendError> {
    let mut out = Vec::new();
    for entry in tree.iter() {
        let (_, value) = entry?;
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}

/// Claim order: priority ascending, LIFO jobs before FIFO jobs, then by sequence.
fn claim_rank(record: &JobRecord) -> (i64, u8, i128) {
    let priority = record.options.priority.unwrap_or(0);
    if record.options.lifo {
        (priority, 0, -(record.seq as i128))
    } else {
        (priority, 1, record.seq as i128)
    }
}

#[async_trait]
impl QueueBackend for SledQueueBackend {
    async fn register_queue(&self, name: &str) -> Result<bool, BackendError> {
        let entry = QueueEntry {
            name: name.to_string(),
            registered_at: crate::types::now_millis(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        let inserted = self
            .queues
            .compare_and_swap(name.as_bytes(), None as Option<&[u8]>, Some(bytes))?;
        Ok(inserted.is_ok())
    }

    async fn queue_names(&self) -> Result<Vec<String>, BackendError> {
        let entries: Vec<QueueEntry> = read_all(&self.queues)?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    async fn enqueue(&self, job: NewJob, now: u64) -> Result<JobRecord, BackendError> {
        let tree = self.jobs(&job.queue)?;
        let _guard = self.write_lock.lock();
        if let Some(id) = &job.id {
            if let Some(existing) = Self::read_job(&tree, id)? {
                return Ok(existing);
            }
        }
        let seq = self.next_seq(&job.queue)?;
        let delay = job.options.delay.unwrap_or(0);
        let record = JobRecord {
            id: job.id.unwrap_or_else(|| seq.to_string()),
            queue: job.queue,
            kind: job.kind,
            status: if delay > 0 {
                JobStatus::Delayed
            } else {
                JobStatus::Waiting
            },
            attempts_made: 0,
            payload: JobPayload {
                document: job.document,
                data: JsonMap::new(),
            },
            return_value: None,
            failed_reason: None,
            stacktrace: Vec::new(),
            options: job.options,
            seq,
            created_at: now,
            processed_at: None,
            finished_at: None,
            process_at: now + delay,
            repeat_key: job.repeat_key,
        };
        Self::write_job(&tree, &record)?;
        Ok(record)
    }

    async fn claim_next(&self, queue: &str, now: u64) -> Result<Option<JobRecord>, BackendError> {
        let tree = self.jobs(queue)?;
        let _guard = self.write_lock.lock();
        let mut best: Option<JobRecord> = None;
        for record in read_all::<JobRecord>(&tree)? {
            let due = match record.status {
                JobStatus::Waiting => true,
                JobStatus::Delayed => record.process_at <= now,
                _ => false,
            };
            if !due {
                continue;
            }
            let better = best
                .as_ref()
                .map(|current| claim_rank(&record) < claim_rank(current))
                .unwrap_or(true);
            if better {
                best = Some(record);
            }
        }
        let Some(mut record) = best else {
            return Ok(None);
        };
        record.status = JobStatus::Active;
        record.processed_at = Some(now);
        Self::write_job(&tree, &record)?;
        Ok(Some(record))
    }

    async fn next_wakeup(&self, queue: &str) -> Result<Option<u64>, BackendError> {
        let tree = self.jobs(queue)?;
        Ok(read_all::<JobRecord>(&tree)?
            .into_iter()
            .filter(|r| r.status == JobStatus::Delayed)
            .map(|r| r.process_at)
            .min())
    }

    async fn get_job(&self, queue: &str, id: &str) -> Result<Option<JobRecord>, BackendError> {
        Self::read_job(&self.jobs(queue)?, id)
    }

    async fn update_job(&self, record: &JobRecord) -> Result<(), BackendError> {
        let tree = self.jobs(&record.queue)?;
        let _guard = self.write_lock.lock();
        Self::write_job(&tree, record)
    }

    async fn remove_job(&self, queue: &str, id: &str) -> Result<bool, BackendError> {
        let tree = self.jobs(queue)?;
        let _guard = self.write_lock.lock();
        Ok(tree.remove(id.as_bytes())?.is_some())
    }

    async fn list_jobs(&self, queue: &str) -> Result<Vec<JobRecord>, BackendError> {
        let mut records: Vec<JobRecord> = read_all(&self.jobs(queue)?)?;
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    async fn merge_data(
        &self,
        queue: &str,
        id: &str,
        data: JsonMap<String, JsonValue>,
    ) -> Result<(), BackendError> {
        self.modify_job(queue, id, |record| {
            for (key, value) in data {
                record.payload.data.insert(key, value);
            }
        })
    }

    async fn append_data(
        &self,
        queue: &str,
        id: &str,
        key: &str,
        chunk: &str,
    ) -> Result<(), BackendError> {
        self.modify_job(queue, id, |record| {
            let entry = record
                .payload
                .data
                .entry(key.to_string())
                .or_insert_with(|| JsonValue::String(String::new()));
            match entry {
                JsonValue::String(text) => text.push_str(chunk),
                other => *other = JsonValue::String(chunk.to_string()),
            }
        })
    }

    async fn put_schedule(&self, schedule: &ScheduleRecord) -> Result<(), BackendError> {
        write(&self.schedules(&schedule.queue)?, &schedule.key, schedule)
    }

    async fn get_schedule(
        &self,
        queue: &str,
        key: &str,
    ) -> Result<Option<ScheduleRecord>, BackendError> {
        read(&self.schedules(queue)?, key)
    }

    async fn list_schedules(&self, queue: &str) -> Result<Vec<ScheduleRecord>, BackendError> {
        let mut schedules: Vec<ScheduleRecord> = read_all(&self.schedules(queue)?)?;
        schedules.sort_by_key(|s| s.next_run);
        Ok(schedules)
    }

    async fn remove_schedule(&self, queue: &str, key: &str) -> Result<bool, BackendError> {
        Ok(self.schedules(queue)?.remove(key.as_bytes())?.is_some())
    }

    async fn recover_stalled(&self, queue: &str) -> Result<Vec<JobId>, BackendError> {
        let tree = self.jobs(queue)?;
        let _guard = self.write_lock.lock();
        let mut recovered = Vec::new();
        for mut record in read_all::<JobRecord>(&tree)? {
            if record.status == JobStatus::Active {
                record.status = JobStatus::Waiting;
                record.process_at = record.created_at;
                Self::write_job(&tree, &record)?;
                recovered.push(record.id);
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::JobOptions;
    use crate::types::JobKind;

    fn backend() -> (tempfile::TempDir, SledQueueBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = SledQueueBackend::open(&dir.path().join("store")).unwrap();
        (dir, backend)
    }

    fn new_job(queue: &str, options: JobOptions) -> NewJob {
        NewJob {
            queue: queue.to_string(),
            kind: JobKind::Generic,
            document: "name: q\n".to_string(),
            options,
            id: None,
            repeat_key: None,
        }
    }

    #[tokio::test]
    async fn registers_queue_names_once() {
        let (_dir, backend) = backend();
        assert!(backend.register_queue("alpha").await.unwrap());
        assert!(!backend.register_queue("alpha").await.unwrap());
        assert!(backend.register_queue("beta").await.unwrap());
        assert_eq!(backend.queue_names().await.unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn claims_by_priority_then_fifo() {
        let (_dir, backend) = backend();
        let low = backend
            .enqueue(new_job("q", JobOptions { priority: Some(5), ..Default::default() }), 1)
            .await
            .unwrap();
        let first = backend.enqueue(new_job("q", JobOptions::default()), 2).await.unwrap();
        let second = backend.enqueue(new_job("q", JobOptions::default()), 3).await.unwrap();

        let order: Vec<String> = [
            backend.claim_next("q", 10).await.unwrap().unwrap().id,
            backend.claim_next("q", 10).await.unwrap().unwrap().id,
            backend.claim_next("q", 10).await.unwrap().unwrap().id,
        ]
        .to_vec();
        assert_eq!(order, vec![first.id, second.id, low.id]);
        assert!(backend.claim_next("q", 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lifo_jobs_are_claimed_newest_first() {
        let (_dir, backend) = backend();
        let lifo = JobOptions {
            lifo: true,
            ..Default::default()
        };
        let fifo = backend.enqueue(new_job("q", JobOptions::default()), 1).await.unwrap();
        let older = backend.enqueue(new_job("q", lifo.clone()), 2).await.unwrap();
        let newer = backend.enqueue(new_job("q", lifo), 3).await.unwrap();
        assert_eq!(backend.claim_next("q", 5).await.unwrap().unwrap().id, newer.id);
        assert_eq!(backend.claim_next("q", 5).await.unwrap().unwrap().id, older.id);
        assert_eq!(backend.claim_next("q", 5).await.unwrap().unwrap().id, fifo.id);
    }

    #[tokio::test]
    async fn delayed_jobs_wait_until_due() {
        let (_dir, backend) = backend();
        let job = backend
            .enqueue(new_job("q", JobOptions { delay: Some(100), ..Default::default() }), 1_000)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Delayed);
        assert_eq!(backend.next_wakeup("q").await.unwrap(), Some(1_100));
        assert!(backend.claim_next("q", 1_050).await.unwrap().is_none());
        let claimed = backend.claim_next("q", 1_100).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Active);
    }

    #[tokio::test]
    async fn explicit_id_returns_existing_job() {
        let (_dir, backend) = backend();
        let mut job = new_job("q", JobOptions::default());
        job.id = Some("nightly".to_string());
        let first = backend.enqueue(job.clone(), 1).await.unwrap();
        let second = backend.enqueue(job, 2).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.list_jobs("q").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn appends_output_chunks() {
        let (_dir, backend) = backend();
        let job = backend.enqueue(new_job("q", JobOptions::default()), 1).await.unwrap();
        backend.append_data("q", &job.id, "stdout", "hel").await.unwrap();
        backend.append_data("q", &job.id, "stdout", "lo").await.unwrap();
        let mut extra = JsonMap::new();
        extra.insert("progress".to_string(), JsonValue::from(50));
        backend.merge_data("q", &job.id, extra).await.unwrap();
        let stored = backend.get_job("q", &job.id).await.unwrap().unwrap();
        assert_eq!(stored.payload.data["stdout"], "hello");
        assert_eq!(stored.payload.data["progress"], 50);
    }

    #[tokio::test]
    async fn stalled_jobs_return_to_waiting() {
        let (_dir, backend) = backend();
        let job = backend.enqueue(new_job("q", JobOptions::default()), 1).await.unwrap();
        backend.claim_next("q", 2).await.unwrap().unwrap();
        assert_eq!(backend.recover_stalled("q").await.unwrap(), vec![job.id.clone()]);
        let stored = backend.get_job("q", &job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let id = {
            let backend = SledQueueBackend::open(&path).unwrap();
            backend.register_queue("q").await.unwrap();
            let job = backend.enqueue(new_job("q", JobOptions::default()), 1).await.unwrap();
            backend.db().flush().unwrap();
            job.id
        };
        let backend = SledQueueBackend::open(&path).unwrap();
        assert_eq!(backend.queue_names().await.unwrap(), vec!["q"]);
        assert!(backend.get_job("q", &id).await.unwrap().is_some());
    }
}
