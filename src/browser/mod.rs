//! Browser Automation
//!
//! Driver abstraction plus the scenario interpreter that browser jobs run. The default
//! driver speaks W3C WebDriver over HTTP; tests plug in their own [`BrowserDriver`].

use crate::error::BrowserError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

pub mod handle;
pub mod interpreter;
pub mod objects;
pub mod processor;
pub mod webdriver;

pub use handle::PageHandle;
pub use interpreter::{
    ActionRegistry, ActionResult, ActionScope, ScenarioAction, ScenarioInterpreter, ScriptAction,
    ScriptHost,
};
pub use objects::{DirectoryObjectStore, ObjectStore, UploadDescriptor};
pub use processor::BrowserProcessor;
pub use webdriver::WebDriverBrowser;

/// How a session is opened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Remote endpoint to connect to instead of launching locally
    pub endpoint: Option<String>,
    pub locale: Option<String>,
    /// Leave the session open after the run
    pub no_close: bool,
    pub download_dir: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}

/// Options of a navigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoOptions {
    pub referer: Option<String>,
    pub timeout: Option<u64>,
    pub wait_until: Option<String>,
}

/// A named interaction with its arguments, e.g. `{action: click, args: ["#go"]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAction {
    pub action: String,
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

/// Opens browser sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str, options: &GotoOptions) -> Result<(), BrowserError>;

    /// Current URL, after redirects
    async fn url(&self) -> Result<String, BrowserError>;

    async fn wait_for_timeout(&self, ms: u64) -> Result<(), BrowserError> {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), BrowserError>;

    async fn wait_for_navigation(&self) -> Result<(), BrowserError>;

    /// Elements matching a CSS selector or an XPath expression
    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn Element>>, BrowserError>;

    /// PNG bytes of the viewport, or of the whole page when `full_page`
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, BrowserError>;

    /// Run a page-level interaction. `Ok(false)` when the page has no such action.
    async fn perform(&self, action: &PageAction) -> Result<bool, BrowserError>;

    /// Run `actions` and wait for the download they trigger.
    async fn expect_download(&self, actions: &[PageAction]) -> Result<Box<dyn Download>, BrowserError>;
}

#[async_trait]
pub trait Element: Send + Sync {
    /// Run an element interaction. `Ok(false)` when the element has no such action.
    async fn perform(&self, action: &str, args: &[JsonValue]) -> Result<bool, BrowserError>;

    /// Read a DOM property such as `innerText` or `href`
    async fn property(&self, name: &str) -> Result<JsonValue, BrowserError>;

    async fn computed_style(&self) -> Result<JsonValue, BrowserError>;
}

#[async_trait]
pub trait Download: Send + Sync {
    fn suggested_filename(&self) -> Option<String>;

    async fn save_as(&self, path: &Path) -> Result<(), BrowserError>;
}
