//! Configuration System
//!
//! Layered configuration: built-in defaults, the user config file, `docket.toml` in the
//! working directory (or an explicit `--config` file), then `DOCKET_*` environment
//! variables. Every section has defaults, so an empty configuration is valid.

use crate::browser::SessionOptions;
use crate::logging::LoggingConfig;
use crate::types::JobKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocketConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub script: ScriptConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the sled database lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

pub(crate) fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "docket")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".docket/store"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Worker and queue naming settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Jobs of one queue running at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Longest idle wait before a worker looks for due jobs again
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Queue for generic documents without a `name`
    #[serde(default = "default_queue")]
    pub default_queue: String,

    #[serde(default = "default_shell_queue")]
    pub shell_queue: String,

    #[serde(default = "default_browser_queue")]
    pub browser_queue: String,
}

fn default_concurrency() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_queue() -> String {
    "__DocketQueue__".to_string()
}

fn default_shell_queue() -> String {
    "__DocketShellQueue__".to_string()
}

fn default_browser_queue() -> String {
    "__DocketBrowserQueue__".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            default_queue: default_queue(),
            shell_queue: default_shell_queue(),
            browser_queue: default_browser_queue(),
        }
    }
}

impl QueueConfig {
    /// Queue used for a document of `kind` that names none.
    pub fn default_queue_for(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Generic => &self.default_queue,
            JobKind::Shell => &self.shell_queue,
            JobKind::Browser => &self.browser_queue,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be positive".to_string());
        }
        for (field, name) in [
            ("default_queue", &self.default_queue),
            ("shell_queue", &self.shell_queue),
            ("browser_queue", &self.browser_queue),
        ] {
            if name.trim().is_empty() {
                return Err(format!("{} cannot be empty", field));
            }
        }
        Ok(())
    }
}

/// Limits of the embedded script engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,

    #[serde(default = "default_max_map_size")]
    pub max_map_size: usize,

    /// The only directory `.rhai` modules may be loaded from; none disables script modules
    #[serde(default)]
    pub modules_dir: Option<PathBuf>,
}

fn default_max_operations() -> u64 {
    10_000_000
}

fn default_max_call_levels() -> usize {
    64
}

fn default_max_expr_depth() -> usize {
    128
}

fn default_max_string_size() -> usize {
    16 * 1024 * 1024
}

fn default_max_array_size() -> usize {
    1_000_000
}

fn default_max_map_size() -> usize {
    100_000
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_array_size(),
            max_map_size: default_max_map_size(),
            modules_dir: None,
        }
    }
}

impl ScriptConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_operations == 0 {
            return Err("max_operations must be positive".to_string());
        }
        if self.max_call_levels == 0 || self.max_expr_depth == 0 {
            return Err("max_call_levels and max_expr_depth must be positive".to_string());
        }
        if let Some(dir) = &self.modules_dir {
            if !dir.is_dir() {
                return Err(format!("modules_dir {} is not a directory", dir.display()));
            }
        }
        Ok(())
    }
}

/// Browser automation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Remote WebDriver endpoint; BROWSERLESS_ENDPOINT overrides it
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Local WebDriver used when no endpoint is set
    #[serde(default = "default_driver_url")]
    pub driver_url: String,

    /// Command that starts the local WebDriver for each session
    #[serde(default)]
    pub driver_command: Option<String>,

    #[serde(default = "default_browser_name")]
    pub browser_name: String,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    /// Root of the directory object store used for screenshot uploads
    #[serde(default)]
    pub object_store_dir: Option<PathBuf>,

    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default = "default_browser_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_driver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_browser_name() -> String {
    "chrome".to_string()
}

fn default_true() -> bool {
    true
}

fn default_browser_timeout_ms() -> u64 {
    30_000
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            driver_url: default_driver_url(),
            driver_command: None,
            browser_name: default_browser_name(),
            headless: default_true(),
            download_dir: None,
            object_store_dir: None,
            locale: None,
            timeout_ms: default_browser_timeout_ms(),
        }
    }
}

impl BrowserConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (field, url) in [("driver_url", Some(&self.driver_url)), ("endpoint", self.endpoint.as_ref())] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(format!("{} must be an http(s) URL, got '{}'", field, url));
                }
            }
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".to_string());
        }
        Ok(())
    }

    /// Session defaults for browser jobs.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            endpoint: self.endpoint.clone(),
            locale: self.locale.clone(),
            no_close: false,
            download_dir: self.download_dir.clone(),
            timeout_ms: Some(self.timeout_ms),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Storage(String),
    Queue(String),
    Script(String),
    Browser(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "storage: {}", msg),
            ValidationError::Queue(msg) => write!(f, "queue: {}", msg),
            ValidationError::Script(msg) => write!(f, "script: {}", msg),
            ValidationError::Browser(msg) => write!(f, "browser: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl DocketConfig {
    /// Validate every section, reporting all problems at once.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.storage.path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage("path cannot be empty".to_string()));
        }
        if let Err(e) = self.queue.validate() {
            errors.push(ValidationError::Queue(e));
        }
        if let Err(e) = self.script.validate() {
            errors.push(ValidationError::Script(e));
        }
        if let Err(e) = self.browser.validate() {
            errors.push(ValidationError::Browser(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
