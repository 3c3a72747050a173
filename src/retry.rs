//! Application-level error escalation.
//!
//! Separate from backend attempts/backoff: escalation resubmits a *modified copy* of the
//! document through the normal submission path. The counter lives in the document itself,
//! so every resubmitted copy carries its own progress toward the threshold.

use crate::context::ExecutionContext;
use crate::document::{DocValue, JobDocument};
use crate::error::{DocketError, DocumentError};
use crate::queue::Submission;
use std::sync::Arc;
use tracing::info;

/// Document field holding the number of escalations made so far, unless `retry.counter`
/// names another one.
pub const DEFAULT_COUNTER: &str = "retry_count";
pub const DEFAULT_DELAY_MS: u64 = 10_000;

/// Declarative `retry: {max, delay, counter}` policy of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub max: u32,
    pub delay: u64,
    pub counter: String,
}

impl EscalationPolicy {
    /// Read the policy from the document's `retry` field. Absent or null means no policy.
    pub fn from_document(document: &JobDocument) -> Result<Option<Self>, DocumentError> {
        let Some(value) = document.get("retry") else {
            return Ok(None);
        };
        let map = match value {
            DocValue::Null => return Ok(None),
            DocValue::Map(map) => map,
            _ => return Err(invalid("retry", "a map with a numeric 'max'")),
        };

        let max = match map.get("max").and_then(DocValue::as_i64) {
            Some(max) if max >= 0 => u32::try_from(max).unwrap_or(u32::MAX),
            _ => return Err(invalid("retry.max", "a non-negative integer")),
        };
        let delay = match map.get("delay") {
            None | Some(DocValue::Null) => DEFAULT_DELAY_MS,
            Some(value) => match value.as_i64() {
                Some(delay) if delay >= 0 => delay as u64,
                _ => return Err(invalid("retry.delay", "a non-negative integer")),
            },
        };
        let counter = match map.get("counter") {
            None | Some(DocValue::Null) => DEFAULT_COUNTER.to_string(),
            Some(DocValue::String(name)) if !name.is_empty() => name.clone(),
            Some(_) => return Err(invalid("retry.counter", "a non-empty string")),
        };

        Ok(Some(Self {
            max,
            delay,
            counter,
        }))
    }

    /// Escalations already made, as recorded in `document`.
    pub fn count(&self, document: &JobDocument) -> u32 {
        document
            .get(&self.counter)
            .and_then(DocValue::as_i64)
            .map(|n| u32::try_from(n.max(0)).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    /// The copy to resubmit, or `None` once the counter has reached `max`.
    ///
    /// The copy has its counter incremented and `option.delay` set to the policy delay.
    /// `option.jobId` and `option.repeat` are dropped so the copy becomes a fresh one-off job.
    pub fn next_document(&self, document: &JobDocument) -> Option<JobDocument> {
        let count = self.count(document);
        if count >= self.max {
            return None;
        }

        let mut copy = document.clone();
        copy.set(self.counter.clone(), DocValue::Int(i64::from(count) + 1));

        let mut options = match copy.get("option") {
            Some(DocValue::Map(map)) => map.clone(),
            _ => Default::default(),
        };
        options.shift_remove("jobId");
        options.shift_remove("job_id");
        options.shift_remove("repeat");
        options.insert("delay".to_string(), DocValue::Int(self.delay as i64));
        copy.set("option", DocValue::Map(options));
        Some(copy)
    }
}

fn invalid(field: &str, expected: &str) -> DocumentError {
    DocumentError::InvalidField {
        field: field.to_string(),
        expected: expected.to_string(),
    }
}

/// Resubmit the live document of `context` under `policy`. Returns `None` when the
/// threshold is reached.
pub async fn escalate(
    context: &Arc<ExecutionContext>,
    policy: &EscalationPolicy,
) -> Result<Option<Submission>, DocketError> {
    let meta = context.meta();
    let document = context.document();
    let Some(copy) = policy.next_document(&document) else {
        info!(
            queue = %meta.queue,
            job_id = %meta.id,
            max = policy.max,
            "Escalation threshold reached"
        );
        return Ok(None);
    };

    let submission = context.submit_document(meta.kind, copy).await?;
    info!(
        queue = %meta.queue,
        job_id = %meta.id,
        escalation = policy.count(&document) + 1,
        max = policy.max,
        delay_ms = policy.delay,
        new_job_id = %submission.id(),
        "Job escalated"
    );
    Ok(Some(submission))
}
