//! Scenario interpreter
//!
//! A scenario is a map from action name to argument. Actions run in registry order, not
//! scenario order, and only when the scenario holds a truthy value under their name.
//! Built-in order is `goto, wait, scrape, screenshot, download, callback`; custom actions
//! replace a built-in of the same name in place and otherwise append.

use super::{BrowserDriver, BrowserSession, Page, PageAction, PageHandle, GotoOptions, SessionOptions};
use super::objects::ObjectStore;
use crate::capability::ModuleSet;
use crate::document::DocValue;
use crate::error::BrowserError;
use crate::script::convert::{doc_to_dynamic, dynamic_to_json};
use crate::script::{Cancellation, ScriptRuntime, ScriptUnit};
use async_trait::async_trait;
use base64::Engine as _;
use indexmap::IndexMap;
use rhai::{Dynamic, FnPtr};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one action. Failures are `{success: false, error}`.
pub type ActionResult = JsonValue;

/// One entry of the action registry.
#[async_trait]
pub trait ScenarioAction: Send + Sync {
    async fn run(&self, scope: &ActionScope, arg: &DocValue) -> Result<ActionResult, BrowserError>;
}

/// Ordered name → action table.
#[derive(Clone)]
pub struct ActionRegistry {
    actions: IndexMap<String, Arc<dyn ScenarioAction>>,
}

impl ActionRegistry {
    pub fn empty() -> Self {
        Self {
            actions: IndexMap::new(),
        }
    }

    /// The built-in actions in their fixed order.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("goto", Arc::new(GotoAction));
        registry.register("wait", Arc::new(WaitAction));
        registry.register("scrape", Arc::new(ScrapeAction));
        registry.register("screenshot", Arc::new(ScreenshotAction));
        registry.register("download", Arc::new(DownloadAction));
        registry.register("callback", Arc::new(CallbackAction));
        registry
    }

    /// Add an action. An existing name keeps its position and gets the new action.
    pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn ScenarioAction>) {
        self.actions.insert(name.into(), action);
    }

    pub fn extend(&mut self, custom: ActionRegistry) {
        for (name, action) in custom.actions {
            self.register(name, action);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ScenarioAction>> {
        self.actions.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Script environment callables run in.
#[derive(Clone)]
pub struct ScriptHost {
    pub runtime: Arc<ScriptRuntime>,
    pub modules: ModuleSet,
    pub cancel: Cancellation,
}

/// What an action sees while it runs: the page, the registry (so actions can call each
/// other) and the optional object store and script host.
#[derive(Clone)]
pub struct ActionScope {
    page: Arc<dyn Page>,
    registry: Arc<ActionRegistry>,
    objects: Option<Arc<dyn ObjectStore>>,
    host: Option<ScriptHost>,
}

impl ActionScope {
    pub fn new(
        page: Arc<dyn Page>,
        registry: Arc<ActionRegistry>,
        objects: Option<Arc<dyn ObjectStore>>,
        host: Option<ScriptHost>,
    ) -> Self {
        Self {
            page,
            registry,
            objects,
            host,
        }
    }

    pub fn page(&self) -> &Arc<dyn Page> {
        &self.page
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn host(&self) -> Option<&ScriptHost> {
        self.host.as_ref()
    }

    fn is_cancelled(&self) -> bool {
        self.host.as_ref().is_some_and(|host| host.cancel.is_cancelled())
    }

    /// Run the registered action `name`. Its own failures come back as a failure result.
    pub async fn run(&self, name: &str, arg: &DocValue) -> Result<ActionResult, BrowserError> {
        let action = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| BrowserError::Unsupported(format!("unknown action '{}'", name)))?;
        Ok(self.invoke(name, action.as_ref(), arg).await)
    }

    async fn invoke(&self, name: &str, action: &dyn ScenarioAction, arg: &DocValue) -> ActionResult {
        match action.run(self, arg).await {
            Ok(result) => result,
            Err(e) => {
                debug!(action = name, error = %e, "Scenario action failed");
                failure(&e)
            }
        }
    }

    /// Run one scenario map against the page.
    pub async fn play(&self, scenario: &IndexMap<String, DocValue>) -> JsonValue {
        let mut result = JsonMap::new();
        for (name, action) in &self.registry.actions {
            let Some(arg) = scenario.get(name).filter(|v| v.is_truthy()) else {
                continue;
            };
            if self.is_cancelled() {
                debug!(action = %name, "Scenario cancelled");
                break;
            }
            debug!(action = %name, "Running scenario action");
            let outcome = self.invoke(name, action.as_ref(), arg).await;
            result.insert(name.clone(), outcome);
        }
        JsonValue::Object(result)
    }
}

pub fn failure(error: &BrowserError) -> ActionResult {
    json!({"success": false, "error": error.to_string()})
}

fn parse_arg<T: DeserializeOwned>(action: &str, value: &DocValue) -> Result<T, BrowserError> {
    serde_json::from_value(value.to_json())
        .map_err(|e| BrowserError::Page(format!("invalid {} argument: {}", action, e)))
}

/// Runs scenarios on a fresh session.
pub struct ScenarioInterpreter {
    driver: Arc<dyn BrowserDriver>,
    objects: Option<Arc<dyn ObjectStore>>,
}

impl ScenarioInterpreter {
    pub fn new(driver: Arc<dyn BrowserDriver>, objects: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { driver, objects }
    }

    /// Open one session and one page, then play `play` (a scenario map or a list of
    /// them, run in sequence on the same page). The session is closed afterwards
    /// unless `options.no_close` is set.
    pub async fn run(
        &self,
        play: &DocValue,
        options: &SessionOptions,
        custom: ActionRegistry,
        host: Option<ScriptHost>,
    ) -> Result<JsonValue, BrowserError> {
        let session = self.driver.open(options).await?;
        let result = self.play_on(session.as_ref(), play, custom, host).await;
        if !options.no_close {
            if let Err(e) = session.close().await {
                warn!(error = %e, "Failed to close browser session");
            }
        }
        result
    }

    async fn play_on(
        &self,
        session: &dyn BrowserSession,
        play: &DocValue,
        custom: ActionRegistry,
        host: Option<ScriptHost>,
    ) -> Result<JsonValue, BrowserError> {
        let page: Arc<dyn Page> = Arc::from(session.new_page().await?);
        let mut registry = ActionRegistry::builtin();
        registry.extend(custom);
        let scope = ActionScope::new(page, Arc::new(registry), self.objects.clone(), host);

        match play {
            DocValue::Map(scenario) => Ok(scope.play(scenario).await),
            DocValue::Seq(scenarios) => {
                let mut results = Vec::with_capacity(scenarios.len());
                for scenario in scenarios {
                    let scenario = scenario.as_map().ok_or_else(|| {
                        BrowserError::Page("every scenario must be a map".to_string())
                    })?;
                    results.push(scope.play(scenario).await);
                }
                Ok(JsonValue::Array(results))
            }
            other => Err(BrowserError::Page(format!(
                "scenario must be a map or a list of maps, not {}",
                other.type_name()
            ))),
        }
    }
}

/// `goto: url` or `goto: {url, referer, timeout, waitUntil}`
struct GotoAction;

#[derive(Deserialize)]
struct GotoArg {
    url: String,
    #[serde(flatten)]
    options: GotoOptions,
}

#[async_trait]
impl ScenarioAction for GotoAction {
    async fn run(&self, scope: &ActionScope, arg: &DocValue) -> Result<ActionResult, BrowserError> {
        let target = match arg {
            DocValue::String(url) => GotoArg {
                url: url.clone(),
                options: GotoOptions::default(),
            },
            other => parse_arg("goto", other)?,
        };
        scope.page.goto(&target.url, &target.options).await?;
        let url = scope.page.url().await?;
        Ok(json!({"success": true, "url": url}))
    }
}

/// `wait: selector` waits for an element, `wait: ms` sleeps, anything else waits for a
/// navigation.
struct WaitAction;

#[async_trait]
impl ScenarioAction for WaitAction {
    async fn run(&self, scope: &ActionScope, arg: &DocValue) -> Result<ActionResult, BrowserError> {
        match arg {
            DocValue::Int(ms) => scope.page.wait_for_timeout((*ms).max(0) as u64).await?,
            DocValue::Float(ms) => scope.page.wait_for_timeout(ms.max(0.0) as u64).await?,
            DocValue::String(selector) => scope.page.wait_for_selector(selector).await?,
            _ => scope.page.wait_for_navigation().await?,
        }
        Ok(json!({"success": true}))
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeCondition {
    selector: String,
    #[serde(default)]
    attributes: Vec<String>,
    #[serde(default)]
    actions: Vec<PageAction>,
}

/// `scrape: condition` yields one record per matching element; a list of conditions
/// yields a list of record lists.
struct ScrapeAction;

impl ScrapeAction {
    async fn scrape(scope: &ActionScope, condition: &DocValue) -> ActionResult {
        match Self::scrape_condition(scope, condition).await {
            Ok(records) => JsonValue::Array(records),
            Err(e) => failure(&e),
        }
    }

    async fn scrape_condition(
        scope: &ActionScope,
        condition: &DocValue,
    ) -> Result<Vec<JsonValue>, BrowserError> {
        let condition: ScrapeCondition = parse_arg("scrape", condition)?;
        let mut records = Vec::new();
        for element in scope.page.query_all(&condition.selector).await? {
            let mut record = JsonMap::new();

            let mut performed = JsonMap::new();
            for action in &condition.actions {
                let outcome = match element.perform(&action.action, &action.args).await {
                    Ok(done) => json!({"success": done}),
                    Err(e) => failure(&e),
                };
                performed.insert(action.action.clone(), outcome);
            }
            if !performed.is_empty() {
                record.insert("$actions".to_string(), JsonValue::Object(performed));
            }

            for attribute in &condition.attributes {
                let value = if attribute == "$style" {
                    element.computed_style().await?
                } else {
                    element.property(attribute).await?
                };
                record.insert(attribute.clone(), value);
            }
            records.push(JsonValue::Object(record));
        }
        Ok(records)
    }
}

#[async_trait]
impl ScenarioAction for ScrapeAction {
    async fn run(&self, scope: &ActionScope, arg: &DocValue) -> Result<ActionResult, BrowserError> {
        match arg {
            DocValue::Seq(conditions) => {
                let mut results = Vec::with_capacity(conditions.len());
                for condition in conditions {
                    results.push(Self::scrape(scope, condition).await);
                }
                Ok(JsonValue::Array(results))
            }
            condition => Ok(Self::scrape(scope, condition).await),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScreenshotArg {
    path: Option<PathBuf>,
    #[serde(alias = "fullPage")]
    full_page: bool,
    upload: Option<UploadArg>,
    s3: Option<UploadArg>,
}

#[derive(Debug, Deserialize)]
struct UploadArg {
    /// Object key
    path: String,
    #[serde(default, alias = "contentType")]
    content_type: Option<String>,
}

/// `screenshot: {path, fullPage, upload}` captures PNG bytes, saves them to `path` and
/// either uploads them or returns them base64-encoded.
struct ScreenshotAction;

#[async_trait]
impl ScenarioAction for ScreenshotAction {
    async fn run(&self, scope: &ActionScope, arg: &DocValue) -> Result<ActionResult, BrowserError> {
        let options: ScreenshotArg = match arg {
            DocValue::Map(_) => parse_arg("screenshot", arg)?,
            _ => ScreenshotArg::default(),
        };
        let bytes = scope.page.screenshot(options.full_page).await?;

        if let Some(path) = &options.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BrowserError::Page(format!("screenshot directory: {}", e)))?;
            }
            tokio::fs::write(path, &bytes)
                .await
                .map_err(|e| BrowserError::Page(format!("failed to save screenshot: {}", e)))?;
        }

        if let Some(upload) = options.upload.as_ref().or(options.s3.as_ref()) {
            let store = scope.objects.as_ref().ok_or_else(|| {
                BrowserError::Upload("no object store is configured".to_string())
            })?;
            let content_type = upload.content_type.as_deref().unwrap_or("image/png");
            let descriptor = store.put(&upload.path, &bytes, content_type).await?;
            return Ok(json!({"success": true, "uploaded": descriptor}));
        }

        let buffer = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Ok(json!({"success": true, "buffer": buffer}))
    }
}

#[derive(Debug, Deserialize)]
struct DownloadArg {
    path: PathBuf,
    #[serde(default)]
    actions: Vec<PageAction>,
}

/// `download: {path, actions}` runs page actions and saves the download they trigger.
struct DownloadAction;

#[async_trait]
impl ScenarioAction for DownloadAction {
    async fn run(&self, scope: &ActionScope, arg: &DocValue) -> Result<ActionResult, BrowserError> {
        let options: DownloadArg = parse_arg("download", arg)?;
        let download = scope.page.expect_download(&options.actions).await?;
        download.save_as(&options.path).await?;
        Ok(json!({"success": true, "path": options.path.to_string_lossy()}))
    }
}

/// `callback: fn(page)` returns whatever the function returns.
struct CallbackAction;

#[async_trait]
impl ScenarioAction for CallbackAction {
    async fn run(&self, scope: &ActionScope, arg: &DocValue) -> Result<ActionResult, BrowserError> {
        let callable = arg
            .as_callable()
            .ok_or_else(|| BrowserError::Page("callback must be a function".to_string()))?;
        let host = scope
            .host
            .as_ref()
            .ok_or_else(|| BrowserError::Unsupported("callbacks need a script host".to_string()))?;
        let page = Dynamic::from(PageHandle::new(scope.clone()));
        let value = host
            .runtime
            .invoke(callable, &host.modules, &host.cancel, vec![page])
            .await
            .map_err(|e| BrowserError::Page(format!("callback failed: {}", e)))?;
        Ok(dynamic_to_json(&value))
    }
}

/// Custom action backed by a script closure `|page, arg| ..`.
pub struct ScriptAction {
    pointer: FnPtr,
    unit: ScriptUnit,
    runtime: Arc<ScriptRuntime>,
}

impl ScriptAction {
    pub fn new(pointer: FnPtr, unit: ScriptUnit, runtime: Arc<ScriptRuntime>) -> Self {
        Self {
            pointer,
            unit,
            runtime,
        }
    }
}

#[async_trait]
impl ScenarioAction for ScriptAction {
    async fn run(&self, scope: &ActionScope, arg: &DocValue) -> Result<ActionResult, BrowserError> {
        let args = vec![
            Dynamic::from(PageHandle::new(scope.clone())),
            doc_to_dynamic(arg),
        ];
        let value = self
            .runtime
            .call_pointer(&self.pointer, &self.unit, args)
            .await
            .map_err(|e| BrowserError::Page(format!("action '{}' failed: {}", self.pointer.fn_name(), e)))?;
        Ok(dynamic_to_json(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ScenarioAction for Echo {
        async fn run(&self, _: &ActionScope, arg: &DocValue) -> Result<ActionResult, BrowserError> {
            Ok(arg.to_json())
        }
    }

    #[test]
    fn custom_actions_replace_in_place_and_append() {
        let mut registry = ActionRegistry::builtin();
        let mut custom = ActionRegistry::empty();
        custom.register("scrape", Arc::new(Echo));
        custom.register("google", Arc::new(Echo));
        registry.extend(custom);
        assert_eq!(
            registry.names(),
            vec!["goto", "wait", "scrape", "screenshot", "download", "callback", "google"]
        );
    }

    #[test]
    fn goto_argument_accepts_camel_case_options() {
        let value = DocValue::from_json(&json!({
            "url": "https://example.com",
            "waitUntil": "networkidle",
            "timeout": 500
        }));
        let arg: GotoArg = parse_arg("goto", &value).unwrap();
        assert_eq!(arg.url, "https://example.com");
        assert_eq!(arg.options.wait_until.as_deref(), Some("networkidle"));
        assert_eq!(arg.options.timeout, Some(500));
    }

    #[test]
    fn failures_are_records() {
        let record = failure(&BrowserError::Page("gone".to_string()));
        assert_eq!(record["success"], false);
        assert_eq!(record["error"], "Page error: gone");
    }
}
