//! The `Job` type seen by scripts.

use crate::context::ExecutionContext;
use crate::error::JobError;
use crate::script::convert::{doc_to_dynamic, dynamic_to_doc, dynamic_to_json, json_to_dynamic, map_to_rhai};
use crate::script::runtime::{bridge, host_error, ScriptResult};
use crate::types::JobKind;
use rhai::{Dynamic, Engine, ImmutableString, Map, INT};
use std::sync::Arc;
use tracing::info;

/// Script-side handle to the running job.
#[derive(Clone)]
pub struct JobHandle {
    context: Arc<ExecutionContext>,
}

impl JobHandle {
    pub fn new(context: Arc<ExecutionContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }
}

pub fn register_job_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<JobHandle>("Job")
        .register_get("id", |job: &mut JobHandle| job.context.meta().id.clone())
        .register_get("queue", |job: &mut JobHandle| {
            job.context.meta().queue.clone()
        })
        .register_get("kind", |job: &mut JobHandle| {
            job.context.meta().kind.as_str().to_string()
        })
        .register_get("attempts_made", |job: &mut JobHandle| {
            job.context.meta().attempts_made as INT
        })
        .register_get("document", |job: &mut JobHandle| {
            Dynamic::from_map(map_to_rhai(job.context.document().fields()))
        })
        .register_fn("get", |job: &mut JobHandle, key: ImmutableString| {
            job.context
                .field(key.as_str())
                .map(|value| doc_to_dynamic(&value))
                .unwrap_or(Dynamic::UNIT)
        })
        .register_fn(
            "set",
            |job: &mut JobHandle, key: ImmutableString, value: Dynamic| {
                job.context.set_field(key.as_str(), dynamic_to_doc(&value));
            },
        )
        .register_fn(
            "set_option",
            |job: &mut JobHandle, key: ImmutableString, value: Dynamic| {
                job.context.set_option(key.as_str(), dynamic_to_doc(&value));
            },
        )
        .register_fn("payload", |job: &mut JobHandle| -> ScriptResult<Map> {
            let data = bridge(job.context.payload())?.map_err(|e| host_error(e.to_string()))?;
            let mut map = Map::new();
            for (key, value) in data.iter() {
                map.insert(key.as_str().into(), json_to_dynamic(value));
            }
            Ok(map)
        })
        .register_fn("update", |job: &mut JobHandle, data: Map| -> ScriptResult<()> {
            let mut object = serde_json::Map::new();
            for (key, value) in data.iter() {
                object.insert(key.to_string(), dynamic_to_json(value));
            }
            bridge(job.context.update(object))?.map_err(|e| host_error(e.to_string()))
        })
        .register_fn("complete", |job: &mut JobHandle| {
            job.context.complete(serde_json::Value::Null)
        })
        .register_fn("complete", |job: &mut JobHandle, value: Dynamic| {
            job.context.complete(dynamic_to_json(&value))
        })
        .register_fn("fail", |job: &mut JobHandle, reason: Dynamic| -> ScriptResult<bool> {
            let context = Arc::clone(&job.context);
            bridge(async move { context.fail(JobError::Thrown(reason.to_string())).await })
        })
        .register_fn("submit", |job: &mut JobHandle| -> ScriptResult<String> {
            let submission =
                bridge(job.context.submit(None))?.map_err(|e| host_error(e.to_string()))?;
            Ok(submission.id().to_string())
        })
        .register_fn(
            "submit",
            |job: &mut JobHandle, kind: ImmutableString| -> ScriptResult<String> {
                let kind: JobKind = kind.as_str().parse().map_err(host_error)?;
                let submission = bridge(job.context.submit(Some(kind)))?
                    .map_err(|e| host_error(e.to_string()))?;
                Ok(submission.id().to_string())
            },
        )
        .register_fn("log", |job: &mut JobHandle, message: Dynamic| {
            let meta = job.context.meta();
            info!(
                target: "docket::script",
                queue = %meta.queue,
                job_id = %meta.id,
                "{}",
                message
            );
        });
}

