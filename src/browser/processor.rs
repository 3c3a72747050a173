//! `main` of browser jobs.
//!
//! Order: `init(job)` supplies custom actions, `play` runs through the interpreter,
//! `then(job, result)` sees the result, and the job completes with the result unless
//! `then` settled it already. Failures go through the regular `fail` path, where a
//! `retry` policy escalates.

use super::interpreter::{ActionRegistry, ScenarioInterpreter, ScriptAction, ScriptHost};
use super::SessionOptions;
use crate::context::ExecutionContext;
use crate::document::{DocValue, JobDocument};
use crate::error::JobError;
use crate::queue::JobProcessor;
use crate::script::convert::json_to_dynamic;
use crate::script::JobHandle;
use async_trait::async_trait;
use rhai::{Dynamic, FnPtr, Map};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct BrowserProcessor {
    interpreter: Arc<ScenarioInterpreter>,
    defaults: SessionOptions,
}

impl BrowserProcessor {
    pub fn new(interpreter: Arc<ScenarioInterpreter>, defaults: SessionOptions) -> Self {
        Self {
            interpreter,
            defaults,
        }
    }

    /// Session options for one document: the defaults overridden by its `browser` map.
    pub fn session_options(&self, document: &JobDocument) -> SessionOptions {
        let mut options = self.defaults.clone();
        let Some(overrides) = document.get("browser").and_then(DocValue::as_map) else {
            return options;
        };
        if let Some(endpoint) = overrides
            .get("endpoint")
            .or_else(|| overrides.get("wsEndpoint"))
            .and_then(DocValue::as_str)
        {
            options.endpoint = Some(endpoint.to_string());
        }
        if let Some(no_close) = overrides
            .get("no_close")
            .or_else(|| overrides.get("noclose"))
        {
            options.no_close = no_close.is_truthy();
        }
        if let Some(locale) = overrides.get("locale").and_then(DocValue::as_str) {
            options.locale = Some(locale.to_string());
        }
        if let Some(dir) = overrides.get("download_dir").and_then(DocValue::as_str) {
            options.download_dir = Some(PathBuf::from(dir));
        }
        if let Some(timeout) = overrides.get("timeout_ms").and_then(DocValue::as_i64) {
            options.timeout_ms = Some(timeout.max(0) as u64);
        }
        options
    }

    async fn custom_actions(&self, context: &Arc<ExecutionContext>) -> Result<ActionRegistry, JobError> {
        let mut registry = ActionRegistry::empty();
        let Some(init) = context.document().callable("init").cloned() else {
            return Ok(registry);
        };

        let runtime = Arc::clone(context.runtime());
        let handle = Dynamic::from(JobHandle::new(Arc::clone(context)));
        let (value, unit) = runtime
            .invoke_unit(&init, context.modules(), context.cancellation(), vec![handle])
            .await?;
        if value.is_unit() {
            return Ok(registry);
        }
        let actions = value
            .try_cast::<Map>()
            .ok_or_else(|| JobError::Script("init must return a map of actions".to_string()))?;
        for (name, action) in declaration_order(&init.body, actions) {
            match action.try_cast::<FnPtr>() {
                Some(pointer) => {
                    debug!(job_id = %context.meta().id, action = %name, "Registered custom action");
                    registry.register(
                        name.to_string(),
                        Arc::new(ScriptAction::new(pointer, unit.clone(), Arc::clone(&runtime))),
                    );
                }
                None => warn!(
                    job_id = %context.meta().id,
                    action = %name,
                    "Ignoring custom action that is not a function"
                ),
            }
        }
        Ok(registry)
    }
}

/// Entries of the map returned by `init`, in the order their keys appear in the init
/// source. Keys not found there follow in name order.
fn declaration_order(source: &str, actions: Map) -> Vec<(String, Dynamic)> {
    let mut entries: Vec<(Option<usize>, String, Dynamic)> = actions
        .into_iter()
        .map(|(name, action)| (key_position(source, &name), name.to_string(), action))
        .collect();
    entries.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    });
    entries
        .into_iter()
        .map(|(_, name, action)| (name, action))
        .collect()
}

/// Offset of the first `name:` map key in `source`, bare or quoted.
fn key_position(source: &str, name: &str) -> Option<usize> {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let candidates = [
        name.to_string(),
        format!("\"{}\"", name),
        format!("'{}'", name),
    ];
    candidates
        .iter()
        .filter_map(|needle| {
            source.match_indices(needle.as_str()).find_map(|(at, _)| {
                let before = source[..at].chars().next_back();
                if before.is_some_and(is_ident) {
                    return None;
                }
                let after = source[at + needle.len()..].trim_start_matches([' ', '\t']);
                (after.starts_with(':') && !after.starts_with("::")).then_some(at)
            })
        })
        .min()
}

#[async_trait]
impl JobProcessor for BrowserProcessor {
    async fn run(&self, context: Arc<ExecutionContext>) -> Result<(), JobError> {
        let document = context.document();
        let play = document
            .get("play")
            .cloned()
            .ok_or_else(|| JobError::Document("browser job has no play scenario".to_string()))?;
        let options = self.session_options(&document);

        let custom = self.custom_actions(&context).await?;
        let host = ScriptHost {
            runtime: Arc::clone(context.runtime()),
            modules: context.modules().clone(),
            cancel: context.cancellation().clone(),
        };
        let result = self.interpreter.run(&play, &options, custom, Some(host)).await?;
        if context.cancellation().is_cancelled() {
            return Err(JobError::Cancelled);
        }

        if let Some(then) = context.document().callable("then").cloned() {
            // `then` settles through the job handle; its return value is not used.
            let _ = context
                .invoke(&then, vec![json_to_dynamic(&result)])
                .await?;
        }
        if !context.is_settled() {
            context.complete(result);
        }
        Ok(())
    }
}
