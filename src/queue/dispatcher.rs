//! Job Dispatcher
//!
//! Turns documents into persisted jobs on named queues and keeps one worker per queue
//! name running in this process.

use crate::capability::CapabilityRegistry;
use crate::config::QueueConfig;
use crate::context::{ContextBuilder, JobSubmitter};
use crate::document::JobDocument;
use crate::error::DocketError;
use crate::queue::backend::QueueBackend;
use crate::queue::processor::Processors;
use crate::queue::record::{JobRecord, NewJob, QueueListing, ScheduleRecord, Submission};
use crate::queue::schedule;
use crate::queue::worker::QueueWorker;
use crate::script::ScriptRuntime;
use crate::types::{now_millis, JobKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct WorkerHandle {
    notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct JobDispatcher {
    config: QueueConfig,
    backend: Arc<dyn QueueBackend>,
    builder: Arc<ContextBuilder>,
    processors: Processors,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl JobDispatcher {
    pub fn new(
        config: QueueConfig,
        backend: Arc<dyn QueueBackend>,
        registry: Arc<CapabilityRegistry>,
        runtime: Arc<ScriptRuntime>,
        processors: Processors,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<JobDispatcher>| {
            let submitter: Weak<dyn JobSubmitter> = this.clone();
            let builder = ContextBuilder::new(registry, runtime, Arc::clone(&backend), submitter);
            Self {
                config,
                backend,
                builder: Arc::new(builder),
                processors,
                workers: Mutex::new(HashMap::new()),
            }
        })
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Queue a document as a job of `kind` and make sure its queue has a worker.
    pub async fn submit(
        &self,
        kind: JobKind,
        document: JobDocument,
    ) -> Result<Submission, DocketError> {
        let submission = self.enqueue(kind, document).await?;
        self.ensure_worker(submission.queue());
        Ok(submission)
    }

    /// Persist a document as a job of `kind` without attaching a worker.
    ///
    /// The queue is `document.name`, or the kind's default queue. Documents with
    /// `option.repeat` are stored as schedules instead.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        document: JobDocument,
    ) -> Result<Submission, DocketError> {
        document.validate_for(kind)?;
        let options = document.options()?;
        let queue = document
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_queue_for(kind).to_string());
        let yaml = document.to_yaml()?;
        let now = now_millis();

        if self.backend.register_queue(&queue).await? {
            info!(queue = %queue, "Registered queue");
        }

        let submission = if options.repeat.is_some() {
            let schedule = ScheduleRecord::create(&queue, kind, yaml, &options, now)?;
            self.backend.put_schedule(&schedule).await?;
            info!(
                queue = %queue,
                schedule = %schedule.key,
                next_run = schedule.next_run,
                "Recurring job scheduled"
            );
            Submission::Scheduled(schedule)
        } else {
            let job = NewJob {
                queue: queue.clone(),
                kind,
                document: yaml,
                id: options.job_id.clone(),
                options,
                repeat_key: None,
            };
            let record = self.backend.enqueue(job, now).await?;
            info!(
                queue = %queue,
                job_id = %record.id,
                kind = %kind,
                status = %record.status,
                "Job enqueued"
            );
            Submission::Job(record)
        };
        Ok(submission)
    }

    /// Attach a worker to every registered queue name. Returns the names.
    pub async fn awaken_all(&self) -> Result<Vec<String>, DocketError> {
        let names = self.backend.queue_names().await?;
        for name in &names {
            self.ensure_worker(name);
        }
        Ok(names)
    }

    /// Start the worker for `queue` unless one is already running. Returns `true` when a
    /// worker was started.
    pub fn ensure_worker(&self, queue: &str) -> bool {
        let mut workers = self.workers.lock();
        if let Some(handle) = workers.get(queue) {
            if !handle.task.is_finished() {
                handle.notify.notify_one();
                return false;
            }
        }

        let notify = Arc::new(Notify::new());
        let running = Arc::new(AtomicBool::new(true));
        let worker = Arc::new(QueueWorker {
            queue: queue.to_string(),
            backend: Arc::clone(&self.backend),
            builder: Arc::clone(&self.builder),
            processors: self.processors.clone(),
            notify: Arc::clone(&notify),
            running: Arc::clone(&running),
            concurrency: self.config.concurrency,
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
        });
        let task = tokio::spawn(worker.run());
        workers.insert(
            queue.to_string(),
            WorkerHandle {
                notify,
                running,
                task,
            },
        );
        debug!(queue, "Worker attached");
        true
    }

    /// Names of queues with a live worker in this process.
    pub fn active_workers(&self) -> Vec<String> {
        let workers = self.workers.lock();
        let mut names: Vec<String> = workers
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn jobs_of(&self, queue: &str) -> Result<QueueListing, DocketError> {
        let jobs = self.backend.list_jobs(queue).await?;
        let repeat_jobs = self.backend.list_schedules(queue).await?;
        Ok(QueueListing {
            jobs: jobs.into_iter().map(|j| j.id).collect(),
            repeat_jobs,
        })
    }

    pub async fn job_records(&self, queue: &str) -> Result<Vec<JobRecord>, DocketError> {
        Ok(self.backend.list_jobs(queue).await?)
    }

    pub async fn describe(&self, queue: &str, id: &str) -> Result<Option<JobRecord>, DocketError> {
        Ok(self.backend.get_job(queue, id).await?)
    }

    /// Remove a job, or cancel a schedule when `id` is a schedule key or an instance id
    /// of a live schedule.
    pub async fn remove(&self, queue: &str, id: &str) -> Result<bool, DocketError> {
        if self.backend.remove_schedule(queue, id).await? {
            info!(queue, schedule = id, "Schedule cancelled");
            return Ok(true);
        }
        if let Some((key, _)) = schedule::parse_instance_id(id) {
            if self.backend.remove_schedule(queue, key).await? {
                info!(queue, schedule = key, "Schedule cancelled");
                self.backend.remove_job(queue, id).await?;
                return Ok(true);
            }
        }
        let removed = self.backend.remove_job(queue, id).await?;
        if removed {
            info!(queue, job_id = id, "Job removed");
        }
        Ok(removed)
    }

    pub async fn queue_names(&self) -> Result<Vec<String>, DocketError> {
        Ok(self.backend.queue_names().await?)
    }

    /// Poll until the job reaches a terminal status (or disappears through retention).
    pub async fn wait_for(
        &self,
        queue: &str,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<JobRecord>, DocketError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let interval = Duration::from_millis(self.config.poll_interval_ms.clamp(10, 100));
        loop {
            let record = self.backend.get_job(queue, id).await?;
            match &record {
                Some(r) if !r.status.is_terminal() => {}
                _ => return Ok(record),
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Ok(record);
                }
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Stop every worker loop. Jobs already running finish on their own.
    pub async fn shutdown(&self) {
        let handles: Vec<WorkerHandle> = self.workers.lock().drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.running.store(false, Ordering::Release);
            handle.notify.notify_one();
        }
        for handle in handles {
            let _ = handle.task.await;
        }
        info!("Stopped queue workers");
    }
}

#[async_trait]
impl JobSubmitter for JobDispatcher {
    async fn submit(&self, kind: JobKind, document: JobDocument) -> Result<Submission, DocketError> {
        JobDispatcher::submit(self, kind, document).await
    }
}
