//! Process wiring: opens storage and connects the capability registry, script runtime,
//! processors and dispatcher. Shared clients are created here and injected downward.

use crate::browser::{
    BrowserDriver, BrowserProcessor, DirectoryObjectStore, ObjectStore, ScenarioInterpreter,
    WebDriverBrowser,
};
use crate::capability::CapabilityRegistry;
use crate::config::DocketConfig;
use crate::error::DocketError;
use crate::queue::{GenericProcessor, JobDispatcher, Processors, QueueBackend, SledQueueBackend};
use crate::script::ScriptRuntime;
use crate::shell::ShellProcessor;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A ready-to-use job system.
pub struct Docket {
    config: DocketConfig,
    dispatcher: Arc<JobDispatcher>,
}

impl Docket {
    /// Open with the WebDriver browser backend.
    pub fn open(config: DocketConfig) -> Result<Self, DocketError> {
        let driver = Arc::new(WebDriverBrowser::new(config.browser.clone())?);
        Self::with_driver(config, driver)
    }

    /// Open with a custom browser driver.
    pub fn with_driver(
        config: DocketConfig,
        driver: Arc<dyn BrowserDriver>,
    ) -> Result<Self, DocketError> {
        let store = SledQueueBackend::open(&config.storage.path)?;
        let client = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DocketError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        let registry = CapabilityRegistry::with_builtins(
            store.db(),
            client,
            config.script.modules_dir.clone(),
        )?;
        let runtime = Arc::new(ScriptRuntime::new(config.script.clone()));

        let objects = config
            .browser
            .object_store_dir
            .clone()
            .map(|dir| Arc::new(DirectoryObjectStore::new(dir)) as Arc<dyn ObjectStore>);
        let interpreter = Arc::new(ScenarioInterpreter::new(driver, objects));
        let processors = Processors::new(
            Arc::new(GenericProcessor),
            Arc::new(ShellProcessor),
            Arc::new(BrowserProcessor::new(
                interpreter,
                config.browser.session_options(),
            )),
        );

        let backend: Arc<dyn QueueBackend> = Arc::new(store);
        let dispatcher = JobDispatcher::new(
            config.queue.clone(),
            backend,
            Arc::new(registry),
            runtime,
            processors,
        );
        info!(
            store = %config.storage.path.display(),
            concurrency = config.queue.concurrency,
            "Docket opened"
        );
        Ok(Self { config, dispatcher })
    }

    pub fn config(&self) -> &DocketConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }
}
