//! CLI route: single route table and run context. Dispatches to the job dispatcher and presentation.

use crate::app::Docket;
use crate::config::{ConfigLoader, DocketConfig};
use crate::document::JobDocument;
use crate::error::DocketError;
use crate::queue::Submission;
use crate::types::JobKind;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::parse::{Commands, OutputFormat};
use super::presentation::{
    format_check_result, format_job_detail, format_job_table, format_queue_names,
    format_submission, CheckReport, CheckedCallable,
};

/// Runtime context for CLI execution: resolved configuration and output format.
/// Storage is opened per command, so `check` never touches the database.
pub struct RunContext {
    config: DocketConfig,
    format: OutputFormat,
}

impl RunContext {
    /// Create run context from the working directory and optional config path.
    pub fn new(config_path: Option<PathBuf>, format: OutputFormat) -> Result<Self, DocketError> {
        let root = std::env::current_dir()?;
        let config = ConfigLoader::load_validated(config_path.as_deref(), &root)?;
        Ok(Self { config, format })
    }

    pub fn from_config(config: DocketConfig, format: OutputFormat) -> Self {
        Self { config, format }
    }

    pub fn config(&self) -> &DocketConfig {
        &self.config
    }

    /// Execute a command and return its printable output.
    pub fn execute(&self, command: &Commands) -> Result<String, DocketError> {
        if let Commands::Check { file, kind } = command {
            return self.handle_check(file, kind.map(JobKind::from));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| DocketError::ConfigError(format!("Failed to start runtime: {}", e)))?;
        runtime.block_on(self.execute_async(command))
    }

    async fn execute_async(&self, command: &Commands) -> Result<String, DocketError> {
        let docket = Docket::open(self.config.clone())?;
        let dispatcher = docket.dispatcher();

        match command {
            Commands::Serve => {
                let queues = dispatcher.awaken_all().await?;
                info!(queues = queues.len(), "Serving queues");
                tokio::signal::ctrl_c().await?;
                info!("Interrupt received, stopping workers");
                dispatcher.shutdown().await;
                Ok(format!("Stopped after serving {} queue(s)", queues.len()))
            }
            Commands::Submit { file, kind } => {
                let document = read_document(file)?;
                let submission = dispatcher.enqueue((*kind).into(), document).await?;
                format_submission(&submission, self.format)
            }
            Commands::Run {
                file,
                kind,
                timeout,
            } => {
                let document = read_document(file)?;
                let submission = dispatcher.submit((*kind).into(), document).await?;
                let Submission::Job(job) = &submission else {
                    // Recurring documents keep firing until interrupted.
                    let out = format_submission(&submission, self.format)?;
                    println!("{}", out);
                    tokio::signal::ctrl_c().await?;
                    dispatcher.shutdown().await;
                    return Ok(String::new());
                };
                let finished = dispatcher
                    .wait_for(&job.queue, &job.id, timeout.map(Duration::from_secs))
                    .await?;
                dispatcher.shutdown().await;
                match finished {
                    Some(record) => format_job_detail(&record, self.format),
                    None => Err(DocketError::NotFound {
                        queue: job.queue.clone(),
                        id: job.id.clone(),
                    }),
                }
            }
            Commands::Queues => {
                let names = dispatcher.queue_names().await?;
                format_queue_names(&names, self.format)
            }
            Commands::Jobs { queue } => {
                let records = dispatcher.job_records(queue).await?;
                let listing = dispatcher.jobs_of(queue).await?;
                format_job_table(queue, &records, &listing, self.format)
            }
            Commands::Show { queue, id } => match dispatcher.describe(queue, id).await? {
                Some(record) => format_job_detail(&record, self.format),
                None => Err(DocketError::NotFound {
                    queue: queue.clone(),
                    id: id.clone(),
                }),
            },
            Commands::Remove { queue, id } => {
                if dispatcher.remove(queue, id).await? {
                    Ok(format!("Removed {}[{}]", queue, id))
                } else {
                    Err(DocketError::NotFound {
                        queue: queue.clone(),
                        id: id.clone(),
                    })
                }
            }
            Commands::Check { file, kind } => self.handle_check(file, kind.map(JobKind::from)),
        }
    }

    fn handle_check(&self, file: &Path, kind: Option<JobKind>) -> Result<String, DocketError> {
        let document = read_document(file)?;
        let kind = kind.unwrap_or_else(|| infer_kind(&document));
        document.validate_for(kind)?;
        let options = document.options()?;
        let queue = document
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| self.config.queue.default_queue_for(kind).to_string());
        let report = CheckReport {
            kind: kind.to_string(),
            queue,
            callables: document
                .callables()
                .into_iter()
                .map(|(path, callable)| CheckedCallable {
                    path,
                    params: callable.params.clone(),
                    is_async: callable.is_async,
                })
                .collect(),
            recurring: options.repeat.is_some(),
        };
        format_check_result(&report, self.format)
    }
}

/// Kind implied by a document's fields when none is given.
fn infer_kind(document: &JobDocument) -> JobKind {
    if document.get("play").is_some() {
        JobKind::Browser
    } else if document.get("command").is_some() && document.main().is_none() {
        JobKind::Shell
    } else {
        JobKind::Generic
    }
}

fn read_document(file: &Path) -> Result<JobDocument, DocketError> {
    let text = if file.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        std::fs::read_to_string(file).map_err(|e| {
            DocketError::ConfigError(format!("Failed to read {}: {}", file.display(), e))
        })?
    };
    Ok(JobDocument::parse(&text)?)
}
