//! Docket: declarative jobs on durable named queues
//!
//! Job documents are YAML files whose fields may hold function literals. Documents are
//! queued on named sled-backed queues, and workers run them through an embedded script
//! engine with capability modules, shell commands, or a browser scenario interpreter.

pub mod app;
pub mod browser;
pub mod capability;
pub mod cli;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod logging;
pub mod queue;
pub mod retry;
pub mod script;
pub mod shell;
pub mod types;

pub use app::Docket;
pub use error::DocketError;
