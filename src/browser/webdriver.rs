//! W3C WebDriver backend
//!
//! Talks to chromedriver (or any WebDriver endpoint) over HTTP. A session either connects
//! to a remote endpoint or uses a local driver, which can be launched per session with
//! `browser.driver_command`.

use super::{BrowserDriver, BrowserSession, Download, Element, GotoOptions, Page, PageAction, SessionOptions};
use crate::config::BrowserConfig;
use crate::error::BrowserError;
use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use reqwest::{Client, Method};
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Key W3C uses for element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecc";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PARTIAL_DOWNLOAD_SUFFIXES: [&str; 3] = [".crdownload", ".part", ".tmp"];

const COMPUTED_STYLE_SCRIPT: &str = "const s = getComputedStyle(arguments[0]); const o = {}; \
     for (let i = 0; i < s.length; i++) { o[s[i]] = s.getPropertyValue(s[i]); } return o;";

fn dispatch_script(event: &str) -> String {
    format!(
        "arguments[0].dispatchEvent(new MouseEvent('{}', {{bubbles: true, cancelable: true}}));",
        event
    )
}

fn map_http_error(error: reqwest::Error) -> BrowserError {
    if error.is_timeout() {
        BrowserError::Session(format!("WebDriver request timed out: {}", error))
    } else if error.is_connect() {
        BrowserError::Session(format!("WebDriver connection error: {}", error))
    } else {
        BrowserError::Session(format!("WebDriver HTTP error: {}", error))
    }
}

/// [`BrowserDriver`] over the WebDriver protocol.
pub struct WebDriverBrowser {
    client: Client,
    config: BrowserConfig,
}

impl WebDriverBrowser {
    pub fn new(config: BrowserConfig) -> Result<Self, BrowserError> {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(Duration::from_millis(config.timeout_ms.saturating_mul(2).max(1_000)))
            .build()
            .map_err(|e| BrowserError::Session(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn capabilities(&self, options: &SessionOptions) -> JsonValue {
        let mut args = Vec::new();
        if self.config.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(locale) = options.locale.as_ref().or(self.config.locale.as_ref()) {
            args.push(format!("--lang={}", locale));
        }
        let mut chrome = json!({ "args": args });
        if let Some(dir) = options.download_dir.as_ref() {
            chrome["prefs"] = json!({
                "download.default_directory": dir.to_string_lossy(),
                "download.prompt_for_download": false,
            });
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": self.config.browser_name,
                    "goog:chromeOptions": chrome,
                }
            }
        })
    }

    async fn launch_driver(&self, command: &str) -> Result<Child, BrowserError> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::Session(format!("failed to launch '{}': {}", command, e)))?;
        info!(command, "Launched WebDriver");

        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let status_url = format!("{}/status", self.config.driver_url.trim_end_matches('/'));
        loop {
            if let Ok(response) = self.client.get(&status_url).send().await {
                if let Ok(body) = response.json::<JsonValue>().await {
                    if body["value"]["ready"].as_bool().unwrap_or(false) {
                        return Ok(child);
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Session(format!(
                    "WebDriver at {} did not become ready",
                    self.config.driver_url
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn open(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let (base, child) = match (&options.endpoint, &self.config.driver_command) {
            (Some(endpoint), _) => (endpoint.clone(), None),
            (None, Some(command)) => (
                self.config.driver_url.clone(),
                Some(self.launch_driver(command).await?),
            ),
            (None, None) => (self.config.driver_url.clone(), None),
        };
        let base = base.trim_end_matches('/').to_string();

        let response = self
            .client
            .post(format!("{}/session", base))
            .json(&self.capabilities(options))
            .send()
            .await
            .map_err(map_http_error)?;
        let value = unwrap_response(response).await?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Session("WebDriver returned no session id".to_string()))?;
        info!(endpoint = %base, session_id, "Browser session opened");

        let core = Arc::new(SessionCore {
            client: self.client.clone(),
            url: format!("{}/session/{}", base, session_id),
            timeout: Duration::from_millis(options.timeout_ms.unwrap_or(self.config.timeout_ms)),
            download_dir: options.download_dir.clone(),
        });
        Ok(Box::new(WebDriverSession {
            core,
            child: Mutex::new(child),
        }))
    }
}

async fn unwrap_response(response: reqwest::Response) -> Result<JsonValue, BrowserError> {
    let status = response.status();
    let body: JsonValue = response.json().await.map_err(map_http_error)?;
    let value = body.get("value").cloned().unwrap_or(JsonValue::Null);
    if status.is_success() {
        return Ok(value);
    }
    let error = value["error"].as_str().unwrap_or("unknown error");
    let message = value["message"].as_str().unwrap_or("");
    Err(BrowserError::Page(format!("{} ({}): {}", error, status.as_u16(), message)))
}

struct SessionCore {
    client: Client,
    url: String,
    timeout: Duration,
    download_dir: Option<PathBuf>,
}

impl SessionCore {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<JsonValue>,
    ) -> Result<JsonValue, BrowserError> {
        let mut request = self
            .client
            .request(method.clone(), format!("{}{}", self.url, path));
        if method == Method::POST {
            request = request.json(&body.unwrap_or_else(|| json!({})));
        }
        let response = request.send().await.map_err(map_http_error)?;
        unwrap_response(response).await
    }

    async fn execute(&self, script: &str, args: Vec<JsonValue>) -> Result<JsonValue, BrowserError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({"script": script, "args": args})),
        )
        .await
    }

    async fn find_all(self: &Arc<Self>, selector: &str) -> Result<Vec<WebDriverElement>, BrowserError> {
        let found = self
            .command(Method::POST, "/elements", Some(locator(selector)))
            .await?;
        let elements = found
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item[ELEMENT_KEY].as_str())
                    .map(|id| WebDriverElement {
                        core: Arc::clone(self),
                        id: id.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(elements)
    }
}

/// XPath when the selector looks like one, CSS otherwise.
fn locator(selector: &str) -> JsonValue {
    let selector = selector.trim();
    if selector.starts_with('/') || selector.starts_with("(/") || selector.starts_with("./") {
        json!({"using": "xpath", "value": selector})
    } else {
        json!({"using": "css selector", "value": selector})
    }
}

struct WebDriverSession {
    core: Arc<SessionCore>,
    child: Mutex<Option<Child>>,
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        Ok(Box::new(WebDriverPage {
            core: Arc::clone(&self.core),
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let result = self.core.command(Method::DELETE, "", None).await.map(|_| ());
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to stop WebDriver process");
            }
        }
        debug!(session = %self.core.url, "Browser session closed");
        result
    }
}

struct WebDriverPage {
    core: Arc<SessionCore>,
}

impl WebDriverPage {
    async fn first(&self, selector: &str) -> Result<WebDriverElement, BrowserError> {
        self.core
            .find_all(selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::Page(format!("no element matches '{}'", selector)))
    }

    fn files_in(dir: &Path) -> HashSet<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Page for WebDriverPage {
    async fn goto(&self, url: &str, options: &GotoOptions) -> Result<(), BrowserError> {
        if let Some(timeout) = options.timeout {
            self.core
                .command(Method::POST, "/timeouts", Some(json!({"pageLoad": timeout})))
                .await?;
        }
        if options.referer.is_some() || options.wait_until.is_some() {
            debug!(url, "WebDriver ignores referer and waitUntil");
        }
        self.core
            .command(Method::POST, "/url", Some(json!({"url": url})))
            .await?;
        Ok(())
    }

    async fn url(&self) -> Result<String, BrowserError> {
        let value = self.core.command(Method::GET, "/url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Page("WebDriver returned no URL".to_string()))
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), BrowserError> {
        let deadline = Instant::now() + self.core.timeout;
        loop {
            if !self.core.find_all(selector).await?.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Page(format!(
                    "timed out waiting for '{}'",
                    selector
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        let start = self.url().await?;
        let deadline = Instant::now() + self.core.timeout;
        loop {
            sleep(POLL_INTERVAL).await;
            let state = self
                .core
                .execute("return document.readyState;", Vec::new())
                .await?;
            if state == "complete" && self.url().await? != start {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Page("timed out waiting for navigation".to_string()));
            }
        }
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn Element>>, BrowserError> {
        Ok(self
            .core
            .find_all(selector)
            .await?
            .into_iter()
            .map(|e| Box::new(e) as Box<dyn Element>)
            .collect())
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, BrowserError> {
        if full_page {
            debug!("WebDriver captures the viewport only");
        }
        let encoded = self.core.command(Method::GET, "/screenshot", None).await?;
        let encoded = encoded
            .as_str()
            .ok_or_else(|| BrowserError::Page("WebDriver returned no screenshot".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| BrowserError::Page(format!("invalid screenshot data: {}", e)))
    }

    async fn perform(&self, action: &PageAction) -> Result<bool, BrowserError> {
        let text = |i: usize| action.args.get(i).and_then(JsonValue::as_str);
        match action.action.as_str() {
            "goto" => {
                let url = text(0)
                    .ok_or_else(|| BrowserError::Page("goto needs a URL".to_string()))?;
                self.goto(url, &GotoOptions::default()).await?;
                Ok(true)
            }
            "waitForTimeout" => {
                let ms = action.args.first().and_then(JsonValue::as_u64).unwrap_or(0);
                self.wait_for_timeout(ms).await?;
                Ok(true)
            }
            "evaluate" => {
                let script = text(0)
                    .ok_or_else(|| BrowserError::Page("evaluate needs a script".to_string()))?;
                self.core.execute(script, action.args[1..].to_vec()).await?;
                Ok(true)
            }
            name => {
                let selector = text(0).ok_or_else(|| {
                    BrowserError::Page(format!("page action '{}' needs a selector", name))
                })?;
                let element = self.first(selector).await?;
                element.perform(name, &action.args[1..]).await
            }
        }
    }

    async fn expect_download(&self, actions: &[PageAction]) -> Result<Box<dyn Download>, BrowserError> {
        let dir = self.core.download_dir.clone().ok_or_else(|| {
            BrowserError::Unsupported("downloads need browser.download_dir".to_string())
        })?;
        let before = Self::files_in(&dir);
        for action in actions {
            if !self.perform(action).await? {
                warn!(action = %action.action, "Page has no such action");
            }
        }

        let deadline = Instant::now() + self.core.timeout;
        loop {
            let finished = Self::files_in(&dir).into_iter().find(|path| {
                let name = path.to_string_lossy();
                !before.contains(path) && !PARTIAL_DOWNLOAD_SUFFIXES.iter().any(|s| name.ends_with(s))
            });
            if let Some(path) = finished {
                return Ok(Box::new(FileDownload { path }));
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Page("timed out waiting for a download".to_string()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

struct WebDriverElement {
    core: Arc<SessionCore>,
    id: String,
}

impl WebDriverElement {
    fn reference(&self) -> JsonValue {
        json!({ ELEMENT_KEY: self.id })
    }

    async fn post(&self, path: &str, body: Option<JsonValue>) -> Result<JsonValue, BrowserError> {
        self.core
            .command(Method::POST, &format!("/element/{}{}", self.id, path), body)
            .await
    }

    async fn selected(&self) -> Result<bool, BrowserError> {
        let value = self
            .core
            .command(Method::GET, &format!("/element/{}/selected", self.id), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn script(&self, script: &str) -> Result<JsonValue, BrowserError> {
        self.core.execute(script, vec![self.reference()]).await
    }
}

#[async_trait]
impl Element for WebDriverElement {
    async fn perform(&self, action: &str, args: &[JsonValue]) -> Result<bool, BrowserError> {
        let text = args
            .first()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .unwrap_or_default();
        match action {
            "click" => {
                self.post("/click", None).await?;
            }
            "dblclick" => {
                self.script(&dispatch_script("dblclick")).await?;
            }
            "hover" => {
                self.script(&dispatch_script("mouseover")).await?;
            }
            "fill" => {
                self.post("/clear", None).await?;
                self.post("/value", Some(json!({"text": text}))).await?;
            }
            "type" | "press" => {
                self.post("/value", Some(json!({"text": text}))).await?;
            }
            "clear" => {
                self.post("/clear", None).await?;
            }
            "check" => {
                if !self.selected().await? {
                    self.post("/click", None).await?;
                }
            }
            "uncheck" => {
                if self.selected().await? {
                    self.post("/click", None).await?;
                }
            }
            "focus" => {
                self.script("arguments[0].focus();").await?;
            }
            "scrollIntoViewIfNeeded" => {
                self.script("arguments[0].scrollIntoView({block: 'center'});")
                    .await?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    async fn property(&self, name: &str) -> Result<JsonValue, BrowserError> {
        self.core
            .command(
                Method::GET,
                &format!("/element/{}/property/{}", self.id, name),
                None,
            )
            .await
    }

    async fn computed_style(&self) -> Result<JsonValue, BrowserError> {
        self.script(COMPUTED_STYLE_SCRIPT).await
    }
}

/// A finished file in the download directory.
struct FileDownload {
    path: PathBuf,
}

#[async_trait]
impl Download for FileDownload {
    fn suggested_filename(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    async fn save_as(&self, path: &Path) -> Result<(), BrowserError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BrowserError::Page(format!("download directory: {}", e)))?;
        }
        tokio::fs::copy(&self.path, path)
            .await
            .map_err(|e| BrowserError::Page(format!("failed to save download: {}", e)))?;
        Ok(())
    }
}
