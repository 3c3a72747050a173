//! CLI presentation: tables and JSON for queue listings, job records and document checks.

use crate::error::DocketError;
use crate::queue::{JobRecord, JobStatus, QueueListing, ScheduleRecord, Submission};
use chrono::{TimeZone, Utc};
use comfy_table::{presets::UTF8_BORDERS_ONLY, presets::UTF8_FULL, Table};
use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::json;

use super::parse::OutputFormat;

fn section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, DocketError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| DocketError::ConfigError(format!("Failed to serialize output: {}", e)))
}

fn timestamp(millis: u64) -> String {
    match Utc.timestamp_millis_opt(millis as i64).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}

fn optional_timestamp(millis: Option<u64>) -> String {
    millis.map(timestamp).unwrap_or_else(|| "-".to_string())
}

fn status_cell(status: JobStatus) -> String {
    match status {
        JobStatus::Completed => status.as_str().green().to_string(),
        JobStatus::Failed => status.as_str().red().to_string(),
        JobStatus::Active => status.as_str().cyan().to_string(),
        JobStatus::Delayed => status.as_str().yellow().to_string(),
        JobStatus::Waiting => status.as_str().to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}

pub fn format_submission(submission: &Submission, format: OutputFormat) -> Result<String, DocketError> {
    match (submission, format) {
        (Submission::Job(record), OutputFormat::Json) => to_json(&json!({
            "queue": record.queue,
            "id": record.id,
            "status": record.status,
        })),
        (Submission::Scheduled(schedule), OutputFormat::Json) => to_json(&json!({
            "queue": schedule.queue,
            "schedule": schedule.key,
            "next_run": schedule.next_run,
        })),
        (Submission::Job(record), OutputFormat::Text) => Ok(format!(
            "Enqueued {}[{}] ({})",
            record.queue, record.id, record.status
        )),
        (Submission::Scheduled(schedule), OutputFormat::Text) => Ok(format!(
            "Scheduled {}[{}], next run {}",
            schedule.queue,
            schedule.key,
            timestamp(schedule.next_run)
        )),
    }
}

pub fn format_queue_names(names: &[String], format: OutputFormat) -> Result<String, DocketError> {
    if format == OutputFormat::Json {
        return to_json(&json!({ "queues": names }));
    }
    if names.is_empty() {
        return Ok("No queues registered.".to_string());
    }
    let mut lines = vec![section_heading("Queues")];
    lines.extend(names.iter().map(|name| format!("  {}", name)));
    Ok(lines.join("\n"))
}

fn schedule_table(schedules: &[ScheduleRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Key", "Kind", "Repeat", "Runs", "Next run"]);
    for schedule in schedules {
        let repeat = match (&schedule.repeat.cron, schedule.repeat.every) {
            (Some(cron), _) => cron.clone(),
            (None, Some(every)) => format!("every {} ms", every),
            (None, None) => "-".to_string(),
        };
        table.add_row(vec![
            schedule.key.clone(),
            schedule.kind.to_string(),
            repeat,
            schedule.count.to_string(),
            timestamp(schedule.next_run),
        ]);
    }
    table
}

/// Jobs of one queue plus its schedules.
pub fn format_job_table(
    queue: &str,
    records: &[JobRecord],
    listing: &QueueListing,
    format: OutputFormat,
) -> Result<String, DocketError> {
    if format == OutputFormat::Json {
        return to_json(listing);
    }

    let mut out = section_heading(&format!("Queue {}", queue));
    if records.is_empty() {
        out.push_str("\nNo jobs.");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["ID", "Kind", "Status", "Attempts", "Created", "Finished"]);
        for record in records {
            table.add_row(vec![
                record.id.clone(),
                record.kind.to_string(),
                status_cell(record.status),
                record.attempts_made.to_string(),
                timestamp(record.created_at),
                optional_timestamp(record.finished_at),
            ]);
        }
        out.push('\n');
        out.push_str(&table.to_string());
    }

    if !listing.repeat_jobs.is_empty() {
        out.push_str("\n\n");
        out.push_str(&section_heading("Schedules"));
        out.push('\n');
        out.push_str(&schedule_table(&listing.repeat_jobs).to_string());
    }
    Ok(out)
}

pub fn format_job_detail(record: &JobRecord, format: OutputFormat) -> Result<String, DocketError> {
    if format == OutputFormat::Json {
        return to_json(record);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.add_row(vec!["Queue".to_string(), record.queue.clone()]);
    table.add_row(vec!["ID".to_string(), record.id.clone()]);
    table.add_row(vec!["Kind".to_string(), record.kind.to_string()]);
    table.add_row(vec!["Status".to_string(), status_cell(record.status)]);
    table.add_row(vec!["Attempts".to_string(), record.attempts_made.to_string()]);
    table.add_row(vec!["Created".to_string(), timestamp(record.created_at)]);
    table.add_row(vec!["Processed".to_string(), optional_timestamp(record.processed_at)]);
    table.add_row(vec!["Finished".to_string(), optional_timestamp(record.finished_at)]);
    if let Some(key) = &record.repeat_key {
        table.add_row(vec!["Schedule".to_string(), key.clone()]);
    }
    if let Some(value) = &record.return_value {
        table.add_row(vec!["Return value".to_string(), truncate(&value.to_string(), 200)]);
    }
    if let Some(reason) = &record.failed_reason {
        table.add_row(vec!["Failed reason".to_string(), reason.clone()]);
    }

    let mut out = section_heading("Job");
    out.push('\n');
    out.push_str(&table.to_string());

    for stream in ["stdout", "stderr"] {
        if let Some(text) = record.payload.data.get(stream).and_then(|v| v.as_str()) {
            if !text.is_empty() {
                out.push_str(&format!("\n\n{}\n{}", section_heading(stream), text.trim_end()));
            }
        }
    }
    if !record.stacktrace.is_empty() {
        out.push_str(&format!("\n\n{}", section_heading("Attempt failures")));
        for (attempt, line) in record.stacktrace.iter().enumerate() {
            out.push_str(&format!("\n  {}. {}", attempt + 1, line));
        }
    }
    Ok(out)
}

/// Outcome of checking a document without submitting it.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub kind: String,
    pub queue: String,
    pub callables: Vec<CheckedCallable>,
    pub recurring: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckedCallable {
    pub path: String,
    pub params: Vec<String>,
    pub is_async: bool,
}

pub fn format_check_result(report: &CheckReport, format: OutputFormat) -> Result<String, DocketError> {
    if format == OutputFormat::Json {
        return to_json(report);
    }
    let mut out = format!(
        "Document is valid for kind '{}' (queue {}{})",
        report.kind,
        report.queue,
        if report.recurring { ", recurring" } else { "" }
    );
    if report.callables.is_empty() {
        out.push_str("\nNo callables.");
        return Ok(out);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Field", "Parameters", "Async"]);
    for callable in &report.callables {
        table.add_row(vec![
            callable.path.clone(),
            callable.params.join(", "),
            if callable.is_async { "yes" } else { "no" }.to_string(),
        ]);
    }
    out.push('\n');
    out.push_str(&table.to_string());
    Ok(out)
}
