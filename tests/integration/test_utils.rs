//! Shared test utilities for integration tests
//!
//! Opens a Docket on a temporary store with a fast poll interval and provides an
//! in-memory browser driver whose pages serve canned elements.

use async_trait::async_trait;
use docket::browser::{
    BrowserDriver, BrowserSession, Download, Element, GotoOptions, Page, PageAction,
    SessionOptions,
};
use docket::config::DocketConfig;
use docket::document::JobDocument;
use docket::error::BrowserError;
use docket::queue::{JobRecord, JobStatus};
use docket::Docket;
use parking_lot::Mutex;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const WAIT: Option<Duration> = Some(Duration::from_secs(20));

pub fn test_config(dir: &Path) -> DocketConfig {
    let mut config = DocketConfig::default();
    config.storage.path = dir.join("store");
    config.queue.poll_interval_ms = 20;
    config
}

/// A Docket on a fresh temp store using the stub browser.
pub fn open_docket() -> (TempDir, Docket, Arc<StubDriver>) {
    let dir = TempDir::new().unwrap();
    let driver = Arc::new(StubDriver::default());
    let docket = Docket::with_driver(test_config(dir.path()), driver.clone()).unwrap();
    (dir, docket, driver)
}

pub fn doc(yaml: &str) -> JobDocument {
    JobDocument::parse(yaml).unwrap()
}

/// Poll until `queue` holds `count` jobs that have all finished.
pub async fn wait_for_finished(docket: &Docket, queue: &str, count: usize) -> Vec<JobRecord> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let records = docket.dispatcher().job_records(queue).await.unwrap();
        if records.len() >= count && records.iter().all(|r| r.status.is_terminal()) {
            return records;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue {} did not settle: {:?}",
            queue,
            records.iter().map(|r| (&r.id, r.status)).collect::<Vec<_>>()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub fn assert_status(record: &JobRecord, status: JobStatus) {
    assert_eq!(
        record.status, status,
        "job {} ended as {} (reason: {:?})",
        record.id, record.status, record.failed_reason
    );
}

/// Browser driver serving one canned site: every page exposes the same elements.
pub struct StubDriver {
    pub elements: HashMap<String, Vec<JsonMap<String, JsonValue>>>,
    pub sessions_opened: AtomicUsize,
    pub sessions_closed: Arc<AtomicUsize>,
}

impl Default for StubDriver {
    fn default() -> Self {
        let mut heading = JsonMap::new();
        heading.insert("innerText".to_string(), json!("Example Domain"));
        heading.insert("id".to_string(), json!("title"));
        let mut elements = HashMap::new();
        elements.insert("h1".to_string(), vec![heading]);
        Self {
            elements,
            sessions_opened: AtomicUsize::new(0),
            sessions_closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl BrowserDriver for StubDriver {
    async fn open(&self, _options: &SessionOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubSession {
            elements: self.elements.clone(),
            closed: Arc::clone(&self.sessions_closed),
        }))
    }
}

struct StubSession {
    elements: HashMap<String, Vec<JsonMap<String, JsonValue>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for StubSession {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        Ok(Box::new(StubPage {
            url: Mutex::new("about:blank".to_string()),
            elements: self.elements.clone(),
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubPage {
    url: Mutex<String>,
    elements: HashMap<String, Vec<JsonMap<String, JsonValue>>>,
}

#[async_trait]
impl Page for StubPage {
    async fn goto(&self, url: &str, _options: &GotoOptions) -> Result<(), BrowserError> {
        if url.starts_with("unreachable:") {
            return Err(BrowserError::Page(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)));
        }
        *self.url.lock() = url.to_string();
        Ok(())
    }

    async fn url(&self) -> Result<String, BrowserError> {
        Ok(self.url.lock().clone())
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), BrowserError> {
        if self.elements.contains_key(selector) {
            Ok(())
        } else {
            Err(BrowserError::Page(format!("timed out waiting for {}", selector)))
        }
    }

    async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn Element>>, BrowserError> {
        Ok(self
            .elements
            .get(selector)
            .map(|found| {
                found
                    .iter()
                    .map(|props| Box::new(StubElement { props: props.clone() }) as Box<dyn Element>)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>, BrowserError> {
        Ok(b"\x89PNG stub".to_vec())
    }

    async fn perform(&self, _action: &PageAction) -> Result<bool, BrowserError> {
        Ok(true)
    }

    async fn expect_download(&self, _actions: &[PageAction]) -> Result<Box<dyn Download>, BrowserError> {
        Err(BrowserError::Unsupported("downloads".to_string()))
    }
}

struct StubElement {
    props: JsonMap<String, JsonValue>,
}

#[async_trait]
impl Element for StubElement {
    async fn perform(&self, action: &str, _args: &[JsonValue]) -> Result<bool, BrowserError> {
        Ok(action == "click")
    }

    async fn property(&self, name: &str) -> Result<JsonValue, BrowserError> {
        Ok(self.props.get(name).cloned().unwrap_or(JsonValue::Null))
    }

    async fn computed_style(&self) -> Result<JsonValue, BrowserError> {
        Ok(json!({"display": "block"}))
    }
}
