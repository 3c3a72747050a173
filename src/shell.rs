//! Shell job adapter.
//!
//! A shell document carries `command`, `args` and `shell_option` instead of a `main`
//! function. Output is streamed into the job payload as it arrives.

use crate::context::ExecutionContext;
use crate::document::{DocValue, JobDocument};
use crate::error::JobError;
use crate::queue::JobProcessor;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 8 * 1024;

/// Spawn settings read from a shell document.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Run through `sh -c` with the arguments joined onto the command line
    pub shell: bool,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ShellSpec {
    pub fn from_document(document: &JobDocument) -> Result<Self, JobError> {
        let command = document
            .get("command")
            .and_then(DocValue::as_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| JobError::Document("shell job has no command".to_string()))?
            .to_string();
        let args = match document.get("args") {
            None | Some(DocValue::Null) => Vec::new(),
            Some(DocValue::Seq(items)) => items
                .iter()
                .map(scalar_text)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| JobError::Document("args must be a list of scalars".to_string()))?,
            Some(_) => {
                return Err(JobError::Document(
                    "args must be a list of scalars".to_string(),
                ))
            }
        };

        let options = document
            .get("shell_option")
            .or_else(|| document.get("shellOption"));
        let mut spec = Self {
            command,
            args,
            shell: true,
            cwd: None,
            env: BTreeMap::new(),
        };
        if let Some(options) = options.and_then(DocValue::as_map) {
            if let Some(shell) = options.get("shell") {
                spec.shell = shell.is_truthy();
            }
            spec.cwd = options
                .get("cwd")
                .and_then(DocValue::as_str)
                .map(PathBuf::from);
            if let Some(env) = options.get("env").and_then(DocValue::as_map) {
                for (key, value) in env {
                    if let Some(text) = scalar_text(value) {
                        spec.env.insert(key.clone(), text);
                    }
                }
            }
        }
        Ok(spec)
    }

    pub fn command(&self) -> Command {
        let mut cmd = if self.shell {
            let mut line = self.command.clone();
            for arg in &self.args {
                line.push(' ');
                line.push_str(arg);
            }
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        } else {
            let mut cmd = Command::new(&self.command);
            cmd.args(&self.args);
            cmd
        };
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&self.env);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn scalar_text(value: &DocValue) -> Option<String> {
    match value {
        DocValue::String(s) => Some(s.clone()),
        DocValue::Int(n) => Some(n.to_string()),
        DocValue::Float(f) => Some(f.to_string()),
        DocValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `main` of shell jobs.
///
/// Non-empty stderr fails the job with that text whatever the exit code. Otherwise the
/// job completes with the exit code, `-1` when the process was killed by a signal.
pub struct ShellProcessor;

#[async_trait]
impl JobProcessor for ShellProcessor {
    async fn run(&self, context: Arc<ExecutionContext>) -> Result<(), JobError> {
        let spec = ShellSpec::from_document(&context.document())?;
        let meta = context.meta();
        debug!(
            queue = %meta.queue,
            job_id = %meta.id,
            command = %spec.command,
            shell = spec.shell,
            "Spawning shell job"
        );

        let mut child = spec
            .command()
            .spawn()
            .map_err(|e| JobError::Process(format!("failed to spawn '{}': {}", spec.command, e)))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Dropping the child on cancellation kills it.
        let cancellation = context.cancellation().clone();
        let (_, errors, status) = tokio::select! {
            output = async {
                tokio::join!(
                    pump(stdout, &context, "stdout"),
                    pump(stderr, &context, "stderr"),
                    child.wait(),
                )
            } => output,
            _ = cancellation.cancelled() => {
                debug!(queue = %meta.queue, job_id = %meta.id, "Killing cancelled shell job");
                return Err(JobError::Cancelled);
            }
        };
        let status = status.map_err(|e| JobError::Process(e.to_string()))?;

        if !errors.is_empty() {
            return Err(JobError::Stderr(errors));
        }
        let code = status.code().unwrap_or(-1);
        context.complete(serde_json::json!(code));
        Ok(())
    }
}

/// Forward one output stream into the payload chunk by chunk. Returns everything read.
async fn pump<R>(reader: Option<R>, context: &ExecutionContext, key: &str) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut collected = String::new();
    let mut decoder = Utf8Carry::default();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(job_id = %context.meta().id, stream = key, error = %e, "Output stream failed");
                break;
            }
        };
        let chunk = decoder.push(&buffer[..read]);
        store_chunk(context, key, &chunk, &mut collected).await;
    }
    let rest = decoder.finish();
    store_chunk(context, key, &rest, &mut collected).await;
    collected
}

async fn store_chunk(context: &ExecutionContext, key: &str, chunk: &str, collected: &mut String) {
    if chunk.is_empty() {
        return;
    }
    if let Err(e) = context.append_output(key, chunk).await {
        warn!(job_id = %context.meta().id, stream = key, error = %e, "Failed to store output chunk");
    }
    collected.push_str(chunk);
}

/// Incremental UTF-8 decoding of a byte stream read in arbitrary pieces.
///
/// A character cut off at the end of a piece is held back until the next one. Bytes that
/// can never form valid UTF-8 become U+FFFD.
#[derive(Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let remainder = rest.to_vec();
        self.pending = remainder;
        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
