//! Shared identifiers and small value types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Job identifier within a queue
pub type JobId = String;

/// Which synthesized `main` a job runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// `main` comes from the document itself
    Generic,
    /// `main` spawns `command`
    Shell,
    /// `main` plays a browser scenario
    Browser,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Generic => "generic",
            JobKind::Shell => "shell",
            JobKind::Browser => "browser",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" | "job" | "jobs" => Ok(JobKind::Generic),
            "shell" => Ok(JobKind::Shell),
            "browser" | "playwright" => Ok(JobKind::Browser),
            other => Err(format!(
                "unknown job kind '{}' (expected generic, shell or browser)",
                other
            )),
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
