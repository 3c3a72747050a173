//! Execution Context Builder
//!
//! One [`ExecutionContext`] exists per job invocation. It owns the live copy of the job
//! document, the capability modules resolved for it, and the `complete`/`fail` hooks. The
//! hooks settle the invocation exactly once; the [`DoneSignal`] returned alongside the
//! context reports how it was settled.
//!
//! Every context carries the [`Cancellation`] of its attempt. Once the attempt is
//! abandoned (after a timeout) its scripts stop and its payload writes are dropped.

use crate::capability::{CapabilityRegistry, ModuleSet};
use crate::document::{Callable, DocValue, JobDocument};
use crate::error::{BackendError, DocketError, JobError};
use crate::queue::{QueueBackend, Submission};
use crate::retry::{self, EscalationPolicy};
use crate::script::{Cancellation, JobHandle, ScriptRuntime};
use crate::types::{JobId, JobKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use rhai::Dynamic;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Submission path used for resubmission from inside a running job.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, kind: JobKind, document: JobDocument) -> Result<Submission, DocketError>;
}

/// Identity of the job an invocation belongs to.
#[derive(Debug, Clone)]
pub struct JobMeta {
    pub id: JobId,
    pub queue: String,
    pub kind: JobKind,
    /// Attempts finished before this one
    pub attempts_made: u32,
    /// Attempts the backend allows in total
    pub max_attempts: u32,
}

impl JobMeta {
    /// Whether a failure of this attempt is final rather than retried by the backend.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts_made + 1 >= self.max_attempts
    }
}

/// How an invocation was settled.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(JsonValue),
    Failed(JobError),
}

/// Resolves once the invocation is settled.
pub struct DoneSignal {
    receiver: oneshot::Receiver<Outcome>,
}

impl DoneSignal {
    /// Wait for settlement. A context dropped without settling yields
    /// [`JobError::Unsettled`].
    pub async fn wait(self) -> Outcome {
        self.receiver
            .await
            .unwrap_or(Outcome::Failed(JobError::Unsettled))
    }
}

struct CompletionHooks {
    settled: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl CompletionHooks {
    fn new() -> (Self, DoneSignal) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                settled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
            },
            DoneSignal { receiver },
        )
    }

    /// Claim the right to settle. Only the first caller gets `true`.
    fn claim(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn resolve(&self, outcome: Outcome) {
        if let Some(sender) = self.sender.lock().take() {
            // The receiver is gone only when nobody waits for the result.
            let _ = sender.send(outcome);
        }
    }
}

/// Per-invocation state handed to a job's code.
pub struct ExecutionContext {
    meta: JobMeta,
    document: Mutex<JobDocument>,
    modules: ModuleSet,
    hooks: CompletionHooks,
    cancellation: Cancellation,
    runtime: Arc<ScriptRuntime>,
    backend: Arc<dyn QueueBackend>,
    submitter: Weak<dyn JobSubmitter>,
}

impl ExecutionContext {
    pub fn meta(&self) -> &JobMeta {
        &self.meta
    }

    /// Snapshot of the live document.
    pub fn document(&self) -> JobDocument {
        self.document.lock().clone()
    }

    pub fn field(&self, key: &str) -> Option<DocValue> {
        self.document.lock().get(key).cloned()
    }

    pub fn set_field(&self, key: &str, value: DocValue) {
        self.document.lock().set(key, value);
    }

    /// Set one entry of the document's `option` map, creating the map when absent.
    pub fn set_option(&self, key: &str, value: DocValue) {
        let mut document = self.document.lock();
        let mut options = match document.get("option") {
            Some(DocValue::Map(map)) => map.clone(),
            _ => Default::default(),
        };
        options.insert(key.to_string(), value);
        document.set("option", DocValue::Map(options));
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    pub fn runtime(&self) -> &Arc<ScriptRuntime> {
        &self.runtime
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn is_settled(&self) -> bool {
        self.hooks.settled.load(Ordering::Acquire)
    }

    /// Settle the invocation successfully. Returns `false` (and logs) when it was
    /// already settled.
    pub fn complete(&self, value: JsonValue) -> bool {
        if !self.hooks.claim() {
            warn!(
                queue = %self.meta.queue,
                job_id = %self.meta.id,
                "complete called on a settled job; ignoring"
            );
            return false;
        }
        debug!(queue = %self.meta.queue, job_id = %self.meta.id, "Job completed by its code");
        self.hooks.resolve(Outcome::Completed(value));
        true
    }

    /// Settle the invocation as failed.
    ///
    /// Order: claim settlement, run the document's `error` hook, run declarative
    /// escalation, then resolve the done signal with `error`. Escalation only follows
    /// the last attempt; earlier failures are retried by the backend instead.
    pub async fn fail(self: &Arc<Self>, error: JobError) -> bool {
        if !self.hooks.claim() {
            warn!(
                queue = %self.meta.queue,
                job_id = %self.meta.id,
                error = %error,
                "fail called on a settled job; ignoring"
            );
            return false;
        }

        let hook = self.document.lock().error_hook().cloned();
        if let Some(hook) = hook {
            let message = Dynamic::from(error.to_string());
            if let Err(hook_error) = self.invoke(&hook, vec![message]).await {
                warn!(
                    queue = %self.meta.queue,
                    job_id = %self.meta.id,
                    error = %hook_error,
                    "Error hook failed"
                );
            }
        }

        let policy = if self.meta.is_last_attempt() {
            EscalationPolicy::from_document(&self.document.lock())
        } else {
            Ok(None)
        };
        match policy {
            Ok(Some(policy)) => {
                if let Err(e) = retry::escalate(self, &policy).await {
                    warn!(
                        queue = %self.meta.queue,
                        job_id = %self.meta.id,
                        error = %e,
                        "Escalation failed"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => warn!(
                queue = %self.meta.queue,
                job_id = %self.meta.id,
                error = %e,
                "Ignoring invalid retry policy"
            ),
        }

        self.hooks.resolve(Outcome::Failed(error));
        true
    }

    /// Invoke a callable with the job handle as first argument.
    pub async fn invoke(
        self: &Arc<Self>,
        callable: &Callable,
        extra: Vec<Dynamic>,
    ) -> Result<Dynamic, JobError> {
        let mut args = Vec::with_capacity(extra.len() + 1);
        args.push(Dynamic::from(JobHandle::new(Arc::clone(self))));
        args.extend(extra);
        self.runtime
            .invoke(callable, &self.modules, &self.cancellation, args)
            .await
    }

    /// Accumulated output data of the job record.
    pub async fn payload(&self) -> Result<JsonMap<String, JsonValue>, BackendError> {
        let record = self
            .backend
            .get_job(&self.meta.queue, &self.meta.id)
            .await?;
        Ok(record.map(|r| r.payload.data).unwrap_or_default())
    }

    /// Merge keys into the job's payload data.
    pub async fn update(&self, data: JsonMap<String, JsonValue>) -> Result<(), BackendError> {
        if self.is_abandoned("update") {
            return Ok(());
        }
        self.backend
            .merge_data(&self.meta.queue, &self.meta.id, data)
            .await
    }

    /// Append a chunk of text under `key` in the payload data.
    pub async fn append_output(&self, key: &str, chunk: &str) -> Result<(), BackendError> {
        if self.is_abandoned("append") {
            return Ok(());
        }
        self.backend
            .append_data(&self.meta.queue, &self.meta.id, key, chunk)
            .await
    }

    fn is_abandoned(&self, write: &str) -> bool {
        let abandoned = self.cancellation.is_cancelled();
        if abandoned {
            debug!(
                queue = %self.meta.queue,
                job_id = %self.meta.id,
                write,
                "Dropping payload write from an abandoned attempt"
            );
        }
        abandoned
    }

    /// Submit a copy of the live document. `kind` defaults to this job's kind.
    pub async fn submit(&self, kind: Option<JobKind>) -> Result<Submission, DocketError> {
        let kind = kind.unwrap_or(self.meta.kind);
        self.submit_document(kind, self.document()).await
    }

    pub(crate) async fn submit_document(
        &self,
        kind: JobKind,
        document: JobDocument,
    ) -> Result<Submission, DocketError> {
        let submitter = self.submitter.upgrade().ok_or_else(|| {
            DocketError::Job(JobError::Script(
                "no dispatcher is available for resubmission".to_string(),
            ))
        })?;
        let submission = submitter.submit(kind, document).await?;
        info!(
            queue = %self.meta.queue,
            job_id = %self.meta.id,
            new_queue = %submission.queue(),
            new_job_id = %submission.id(),
            "Job resubmitted from running job"
        );
        Ok(submission)
    }
}

/// Builds execution contexts for dequeued jobs.
pub struct ContextBuilder {
    registry: Arc<CapabilityRegistry>,
    runtime: Arc<ScriptRuntime>,
    backend: Arc<dyn QueueBackend>,
    submitter: Weak<dyn JobSubmitter>,
}

impl ContextBuilder {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        runtime: Arc<ScriptRuntime>,
        backend: Arc<dyn QueueBackend>,
        submitter: Weak<dyn JobSubmitter>,
    ) -> Self {
        Self {
            registry,
            runtime,
            backend,
            submitter,
        }
    }

    pub fn runtime(&self) -> &Arc<ScriptRuntime> {
        &self.runtime
    }

    /// Resolve the document's modules and install the completion hooks. Never runs `main`.
    pub fn build(
        &self,
        meta: JobMeta,
        document: JobDocument,
    ) -> Result<(Arc<ExecutionContext>, DoneSignal), JobError> {
        let entries = document
            .modules()
            .map_err(|e| JobError::Document(e.to_string()))?;
        let modules = self.registry.resolve_all(&entries, &self.runtime)?;
        Ok(self.assemble(meta, document, modules))
    }

    /// Context with no capability modules, for routing a failed [`ContextBuilder::build`]
    /// through [`ExecutionContext::fail`] so the document's error hook still runs.
    pub fn build_without_modules(
        &self,
        meta: JobMeta,
        document: JobDocument,
    ) -> (Arc<ExecutionContext>, DoneSignal) {
        self.assemble(meta, document, Arc::new(Vec::new()))
    }

    fn assemble(
        &self,
        meta: JobMeta,
        document: JobDocument,
        modules: ModuleSet,
    ) -> (Arc<ExecutionContext>, DoneSignal) {
        let (hooks, done) = CompletionHooks::new();
        let context = ExecutionContext {
            meta,
            document: Mutex::new(document),
            modules,
            hooks,
            cancellation: Cancellation::new(),
            runtime: Arc::clone(&self.runtime),
            backend: Arc::clone(&self.backend),
            submitter: self.submitter.clone(),
        };
        (Arc::new(context), done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::TimeCapability;
    use crate::config::ScriptConfig;
    use crate::error::CapabilityError;
    use crate::queue::SledQueueBackend;

    struct NoSubmitter;

    #[async_trait]
    impl JobSubmitter for NoSubmitter {
        async fn submit(&self, _: JobKind, _: JobDocument) -> Result<Submission, DocketError> {
            Err(DocketError::ConfigError("unused".to_string()))
        }
    }

    fn builder(dir: &std::path::Path) -> ContextBuilder {
        let db = sled::open(dir).unwrap();
        let backend: Arc<dyn QueueBackend> = Arc::new(SledQueueBackend::from_db(db).unwrap());
        let mut registry = CapabilityRegistry::new(None);
        registry.register(&TimeCapability).unwrap();
        let submitter: Weak<dyn JobSubmitter> = Weak::<NoSubmitter>::new();
        ContextBuilder::new(
            Arc::new(registry),
            Arc::new(ScriptRuntime::new(ScriptConfig::default())),
            backend,
            submitter,
        )
    }

    fn meta() -> JobMeta {
        JobMeta {
            id: "1".to_string(),
            queue: "q".to_string(),
            kind: JobKind::Generic,
            attempts_made: 0,
            max_attempts: 1,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_settlement_wins() {
        let dir = tempfile::tempdir().unwrap();
        let doc = JobDocument::parse("main: !!js/function 'job => job.complete()'").unwrap();
        let (ctx, done) = builder(dir.path()).build(meta(), doc).unwrap();

        assert!(ctx.complete(serde_json::json!(1)));
        assert!(!ctx.complete(serde_json::json!(2)));
        assert!(!ctx.fail(JobError::Thrown("late".to_string())).await);

        match done.wait().await {
            Outcome::Completed(value) => assert_eq!(value, serde_json::json!(1)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_settlement_takes_effect_once() {
        let dir = tempfile::tempdir().unwrap();
        let doc = JobDocument::parse("main: !!js/function 'job => job.complete()'").unwrap();
        let (ctx, done) = builder(dir.path()).build(meta(), doc).unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let ctx = Arc::clone(&ctx);
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    ctx.complete(serde_json::json!(i))
                } else {
                    ctx.fail(JobError::Thrown(i.to_string())).await
                }
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        let _ = done.wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn error_hook_runs_before_resolution_and_its_errors_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let text = r#"
seen: ""
main: !!js/function 'job => job.complete()'
error: !!js/function |
  function (job, message) {
    job.set("seen", message);
    throw "hook exploded";
  }
"#;
        let doc = JobDocument::parse(text).unwrap();
        let (ctx, done) = builder(dir.path()).build(meta(), doc).unwrap();
        assert!(ctx.fail(JobError::Thrown("original".to_string())).await);
        match done.wait().await {
            Outcome::Failed(JobError::Thrown(message)) => assert_eq!(message, "original"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(ctx.field("seen"), Some(DocValue::from("original")));
    }

    #[tokio::test]
    async fn dropped_context_is_unsettled() {
        let dir = tempfile::tempdir().unwrap();
        let doc = JobDocument::parse("main: !!js/function 'job => 1'").unwrap();
        let (ctx, done) = builder(dir.path()).build(meta(), doc).unwrap();
        drop(ctx);
        assert!(matches!(done.wait().await, Outcome::Failed(JobError::Unsettled)));
    }

    #[tokio::test]
    async fn unresolvable_module_fails_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let doc =
            JobDocument::parse("modules: [time, mailer]\nmain: !!js/function 'job => 1'").unwrap();
        let err = builder(dir.path()).build(meta(), doc).err().unwrap();
        assert!(matches!(
            err,
            JobError::Capability(CapabilityError::Unresolvable(name)) if name == "mailer"
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn context_without_modules_still_runs_the_error_hook() {
        let dir = tempfile::tempdir().unwrap();
        let text = r#"
modules: [mailer]
main: !!js/function 'job => job.complete()'
error: !!js/function 'function (job, message) { job.set("seen", message); }'
"#;
        let builder = builder(dir.path());
        let doc = JobDocument::parse(text).unwrap();
        let err = builder.build(meta(), doc.clone()).err().unwrap();
        let (ctx, done) = builder.build_without_modules(meta(), doc);
        assert!(ctx.fail(err).await);
        assert!(matches!(
            done.wait().await,
            Outcome::Failed(JobError::Capability(CapabilityError::Unresolvable(_)))
        ));
        assert_eq!(
            ctx.field("seen"),
            Some(DocValue::from("Unknown capability: mailer"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_context_stops_its_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let doc = JobDocument::parse("main: !!js/function 'job => job.complete()'").unwrap();
        let (ctx, _done) = builder(dir.path()).build(meta(), doc).unwrap();
        ctx.cancellation().cancel();
        let hook = crate::document::extract("function (job) { job.set(\"late\", true); }").unwrap();
        assert!(matches!(ctx.invoke(&hook, vec![]).await, Err(JobError::Cancelled)));
        assert_eq!(ctx.field("late"), None);
    }

    #[test]
    fn only_the_last_attempt_is_final() {
        let mut meta = meta();
        meta.max_attempts = 3;
        assert!(!meta.is_last_attempt());
        meta.attempts_made = 2;
        assert!(meta.is_last_attempt());
    }
}
