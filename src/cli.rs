//! CLI domain: parse, route, output, and presentation only.
//! No domain orchestration; a single route table dispatches to the dispatcher.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands, KindArg, OutputFormat};
pub use presentation::{
    format_check_result, format_job_detail, format_job_table, format_queue_names,
    format_submission, CheckReport,
};
pub use route::RunContext;
