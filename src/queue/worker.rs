//! Queue worker: claims due jobs of one queue and runs them.

use crate::context::{ContextBuilder, JobMeta, Outcome};
use crate::document::{JobDocument, Retention};
use crate::error::{BackendError, JobError};
use crate::queue::backend::QueueBackend;
use crate::queue::processor::Processors;
use crate::queue::record::{JobRecord, JobStatus};
use crate::types::now_millis;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub(crate) struct QueueWorker {
    pub(crate) queue: String,
    pub(crate) backend: Arc<dyn QueueBackend>,
    pub(crate) builder: Arc<ContextBuilder>,
    pub(crate) processors: Processors,
    pub(crate) notify: Arc<Notify>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) concurrency: usize,
    pub(crate) poll_interval: Duration,
}

impl QueueWorker {
    /// Worker loop for one queue
    pub(crate) async fn run(self: Arc<Self>) {
        debug!(queue = %self.queue, "Worker started");

        match self.backend.recover_stalled(&self.queue).await {
            Ok(recovered) if !recovered.is_empty() => warn!(
                queue = %self.queue,
                count = recovered.len(),
                job_ids = ?recovered,
                "Recovered stalled jobs"
            ),
            Ok(_) => {}
            Err(e) => error!(queue = %self.queue, error = %e, "Failed to recover stalled jobs"),
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));

        while self.running.load(Ordering::Acquire) {
            let now = now_millis();
            if let Err(e) = self.materialize_schedules(now).await {
                error!(queue = %self.queue, error = %e, "Failed to materialize schedules");
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            match self.backend.claim_next(&self.queue, now).await {
                Ok(Some(record)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.execute(record).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    error!(queue = %self.queue, error = %e, "Failed to claim job");
                }
            }

            // No due job: wait for a submission, the next due time or the poll interval.
            let wait = self.time_until_next_wakeup(now).await;
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = sleep(wait) => {}
            }
        }

        debug!(queue = %self.queue, "Worker stopped");
    }

    async fn time_until_next_wakeup(&self, now: u64) -> Duration {
        let mut next: Option<u64> = self.backend.next_wakeup(&self.queue).await.ok().flatten();
        if let Ok(schedules) = self.backend.list_schedules(&self.queue).await {
            if let Some(first) = schedules.iter().map(|s| s.next_run).min() {
                next = Some(next.map_or(first, |n| n.min(first)));
            }
        }
        match next {
            Some(at) => self.poll_interval.min(Duration::from_millis(at.saturating_sub(now))),
            None => self.poll_interval,
        }
    }

    async fn materialize_schedules(&self, now: u64) -> Result<(), BackendError> {
        for mut schedule in self.backend.list_schedules(&self.queue).await? {
            if schedule.next_run > now {
                continue;
            }
            let record = self.backend.enqueue(schedule.instance(), now).await?;
            info!(
                queue = %self.queue,
                job_id = %record.id,
                schedule = %schedule.key,
                "Recurring job materialized"
            );
            match schedule.advance() {
                Ok(true) => self.backend.put_schedule(&schedule).await?,
                Ok(false) => {
                    info!(queue = %self.queue, schedule = %schedule.key, "Schedule finished");
                    self.backend.remove_schedule(&self.queue, &schedule.key).await?;
                }
                Err(e) => {
                    warn!(queue = %self.queue, schedule = %schedule.key, error = %e, "Dropping invalid schedule");
                    self.backend.remove_schedule(&self.queue, &schedule.key).await?;
                }
            }
        }
        Ok(())
    }

    /// Run one claimed job and record the outcome.
    async fn execute(&self, record: JobRecord) {
        info!(
            queue = %record.queue,
            job_id = %record.id,
            kind = %record.kind,
            attempt = record.attempts_made + 1,
            "Job claimed"
        );
        let outcome = self.run_attempt(&record).await;
        if let Err(e) = self.finish(&record.queue, &record.id, outcome).await {
            error!(queue = %record.queue, job_id = %record.id, error = %e, "Failed to record job outcome");
        }
    }

    async fn run_attempt(&self, record: &JobRecord) -> Outcome {
        let document = match JobDocument::parse(&record.payload.document) {
            Ok(document) => document,
            Err(e) => return Outcome::Failed(JobError::Document(e.to_string())),
        };
        let meta = JobMeta {
            id: record.id.clone(),
            queue: record.queue.clone(),
            kind: record.kind,
            attempts_made: record.attempts_made,
            max_attempts: record.options.max_attempts(),
        };
        let (context, done) = match self.builder.build(meta.clone(), document.clone()) {
            Ok(built) => built,
            Err(e) => {
                warn!(queue = %record.queue, job_id = %record.id, error = %e, "Job context could not be built");
                let (context, done) = self.builder.build_without_modules(meta, document);
                context.fail(e).await;
                drop(context);
                return done.wait().await;
            }
        };

        let processor = self.processors.get(record.kind);
        let attempt = {
            let context = Arc::clone(&context);
            async move {
                match processor.run(Arc::clone(&context)).await {
                    Ok(()) if !context.is_settled() => {
                        context.fail(JobError::Unsettled).await;
                    }
                    Ok(()) => {}
                    Err(e) if context.is_settled() => {
                        debug!(job_id = %context.meta().id, error = %e, "Error after settlement ignored");
                    }
                    Err(e) => {
                        context.fail(e).await;
                    }
                }
            }
        };
        tokio::pin!(attempt);
        match record.options.timeout.filter(|ms| *ms > 0) {
            Some(ms) => {
                let limit = Duration::from_millis(ms);
                if tokio::time::timeout(limit, attempt.as_mut()).await.is_err() {
                    warn!(queue = %record.queue, job_id = %record.id, timeout_ms = ms, "Job timed out");
                    context.fail(JobError::Timeout(ms)).await;
                    // The job is only released once the abandoned attempt has stopped.
                    context.cancellation().cancel();
                    attempt.await;
                    debug!(queue = %record.queue, job_id = %record.id, "Timed out attempt stopped");
                }
            }
            None => attempt.await,
        }
        drop(context);
        done.wait().await
    }

    async fn finish(&self, queue: &str, id: &str, outcome: Outcome) -> Result<(), BackendError> {
        let Some(mut record) = self.backend.get_job(queue, id).await? else {
            warn!(queue, job_id = id, "Job was removed while running");
            return Ok(());
        };
        let now = now_millis();
        record.attempts_made += 1;

        match outcome {
            Outcome::Completed(value) => {
                record.status = JobStatus::Completed;
                record.return_value = Some(value);
                record.finished_at = Some(now);
                self.backend.update_job(&record).await?;
                info!(queue, job_id = id, attempts = record.attempts_made, "Job completed");
                self.apply_retention(&record, record.options.remove_on_complete)
                    .await?;
            }
            Outcome::Failed(error) => {
                let reason = error.to_string();
                record.failed_reason = Some(reason.clone());
                record.stacktrace.push(reason.clone());
                if record.attempts_made < record.options.max_attempts() {
                    let delay = record
                        .options
                        .backoff
                        .map(|b| b.delay_for(record.attempts_made))
                        .unwrap_or(0);
                    record.status = if delay > 0 {
                        JobStatus::Delayed
                    } else {
                        JobStatus::Waiting
                    };
                    record.process_at = now + delay;
                    self.backend.update_job(&record).await?;
                    info!(
                        queue,
                        job_id = id,
                        attempts = record.attempts_made,
                        delay_ms = delay,
                        error = %reason,
                        "Retry scheduled"
                    );
                    self.notify.notify_one();
                } else {
                    record.status = JobStatus::Failed;
                    record.finished_at = Some(now);
                    self.backend.update_job(&record).await?;
                    warn!(
                        queue,
                        job_id = id,
                        attempts = record.attempts_made,
                        error = %reason,
                        "Job failed"
                    );
                    self.apply_retention(&record, record.options.remove_on_fail)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn apply_retention(
        &self,
        record: &JobRecord,
        retention: Option<Retention>,
    ) -> Result<(), BackendError> {
        match retention {
            None | Some(Retention::Remove(false)) => Ok(()),
            Some(Retention::Remove(true)) => {
                self.backend.remove_job(&record.queue, &record.id).await?;
                debug!(queue = %record.queue, job_id = %record.id, "Removed finished job");
                Ok(())
            }
            Some(Retention::Keep(keep)) => {
                let mut finished: Vec<JobRecord> = self
                    .backend
                    .list_jobs(&record.queue)
                    .await?
                    .into_iter()
                    .filter(|r| r.status == record.status)
                    .collect();
                finished.sort_by_key(|r| std::cmp::Reverse((r.finished_at, r.seq)));
                for old in finished.iter().skip(keep) {
                    self.backend.remove_job(&old.queue, &old.id).await?;
                    debug!(queue = %old.queue, job_id = %old.id, "Pruned finished job");
                }
                Ok(())
            }
        }
    }
}
