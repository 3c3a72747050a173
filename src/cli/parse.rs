//! CLI parse: clap types for Docket. No behavior; definitions only.

use crate::types::JobKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Docket CLI - declarative jobs on durable named queues
#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Run YAML job documents with embedded script logic on durable named queues")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides docket.toml in the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Command output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Job kind as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    #[value(alias = "job", alias = "jobs")]
    Generic,
    Shell,
    #[value(alias = "playwright")]
    Browser,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Generic => JobKind::Generic,
            KindArg::Shell => JobKind::Shell,
            KindArg::Browser => JobKind::Browser,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Attach workers to every registered queue and process jobs until interrupted
    Serve,
    /// Submit a job document; a running `serve` picks it up
    Submit {
        /// YAML document, or `-` for stdin
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = KindArg::Generic)]
        kind: KindArg,
    },
    /// Submit a job document and process its queue until the job finishes
    Run {
        /// YAML document, or `-` for stdin
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = KindArg::Generic)]
        kind: KindArg,
        /// Give up waiting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List registered queue names
    Queues,
    /// List jobs and schedules of a queue
    Jobs { queue: String },
    /// Show one job
    Show { queue: String, id: String },
    /// Remove a job or cancel a schedule
    Remove { queue: String, id: String },
    /// Parse and validate a document without submitting it
    Check {
        /// YAML document, or `-` for stdin
        file: PathBuf,
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
}
