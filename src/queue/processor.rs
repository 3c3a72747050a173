//! Per-kind `main` implementations.

use crate::context::ExecutionContext;
use crate::error::JobError;
use crate::types::JobKind;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs the `main` of one job kind against a built context.
///
/// Returning `Err` routes the error to the context's `fail` hook. Returning `Ok` without
/// settling the context fails the job as unsettled.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn run(&self, context: Arc<ExecutionContext>) -> Result<(), JobError>;
}

/// Calls the document's own `main(job)`.
pub struct GenericProcessor;

#[async_trait]
impl JobProcessor for GenericProcessor {
    async fn run(&self, context: Arc<ExecutionContext>) -> Result<(), JobError> {
        let main = context
            .document()
            .main()
            .cloned()
            .ok_or_else(|| JobError::Document("document has no main function".to_string()))?;
        context.invoke(&main, Vec::new()).await?;
        Ok(())
    }
}

/// The processor for each job kind.
#[derive(Clone)]
pub struct Processors {
    generic: Arc<dyn JobProcessor>,
    shell: Arc<dyn JobProcessor>,
    browser: Arc<dyn JobProcessor>,
}

impl Processors {
    pub fn new(
        generic: Arc<dyn JobProcessor>,
        shell: Arc<dyn JobProcessor>,
        browser: Arc<dyn JobProcessor>,
    ) -> Self {
        Self {
            generic,
            shell,
            browser,
        }
    }

    pub fn get(&self, kind: JobKind) -> Arc<dyn JobProcessor> {
        match kind {
            JobKind::Generic => Arc::clone(&self.generic),
            JobKind::Shell => Arc::clone(&self.shell),
            JobKind::Browser => Arc::clone(&self.browser),
        }
    }
}
