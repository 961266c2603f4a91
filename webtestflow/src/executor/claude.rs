//! Backend driving the `claude` CLI in stream-json mode.

use super::backend::{BackendRequest, RawEvent, RawEventStream, ToolBackend};
use crate::errors::BackendError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default program name.
pub const DEFAULT_PROGRAM: &str = "claude";

/// Maximum stderr bytes kept for error reports.
const MAX_STDERR_BYTES: usize = 16 * 1024;

/// Runs each call as `claude -p --verbose --output-format stream-json`.
///
/// The instruction is written to the child's stdin rather than passed as an
/// argument, so its size is not bounded by the OS argument limit. The child
/// process is killed when the returned stream is dropped, which is
/// how timeouts and cancellation stop an in-flight call.
#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    program: String,
    model: Option<String>,
    skip_permissions: bool,
    extra_args: Vec<String>,
}

impl Default for ClaudeCliBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl ClaudeCliBackend {
    /// Creates a backend that runs `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            model: None,
            skip_permissions: true,
            extra_args: Vec::new(),
        }
    }

    /// Selects the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Controls `--dangerously-skip-permissions`.
    #[must_use]
    pub fn with_skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    /// Appends extra CLI arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns the program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Builds the argument list. The instruction itself goes to stdin.
    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--verbose".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl ToolBackend for ClaudeCliBackend {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn start(&self, request: &BackendRequest) -> Result<RawEventStream, BackendError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args())
            .current_dir(&request.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            label = %request.label,
            program = %self.program,
            model = ?self.model,
            work_dir = %request.work_dir.display(),
            instruction_bytes = request.instruction.len(),
            "Spawning backend process"
        );

        let mut child = cmd.spawn().map_err(|e| BackendError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;
        // Fed from its own task: the child may fill stdout before reading stdin.
        if let Some(mut stdin) = child.stdin.take() {
            let instruction = request.instruction.clone();
            let label = request.label.clone();
            tokio::spawn(async move {
                if let Err(err) = stdin.write_all(instruction.as_bytes()).await {
                    debug!(label = %label, error = %err, "Backend closed stdin early");
                }
            });
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Io("backend stdout was not captured".to_string()))?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_tail(stderr, MAX_STDERR_BYTES)));

        let state = StreamState {
            lines: BufReader::new(stdout).lines(),
            child: Some(child),
            stderr_task,
            saw_result: false,
            done: false,
        };
        Ok(event_stream(state))
    }
}

struct StreamState {
    lines: Lines<BufReader<ChildStdout>>,
    child: Option<Child>,
    stderr_task: Option<JoinHandle<String>>,
    saw_result: bool,
    done: bool,
}

impl StreamState {
    /// Waits for the child after stdout closed and reports a failed exit.
    async fn finish(&mut self) -> Result<(), BackendError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .await
            .map_err(|e| BackendError::Io(e.to_string()))?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if status.success() || self.saw_result {
            if !stderr.trim().is_empty() {
                debug!(stderr = %stderr.trim(), "Backend wrote to stderr");
            }
            return Ok(());
        }
        warn!(code = ?status.code(), "Backend exited without a result event");
        Err(BackendError::Exited {
            code: status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}

fn event_stream(state: StreamState) -> RawEventStream {
    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            match state.lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RawEvent>(trimmed) {
                        Ok(event) => {
                            if event.get("type").and_then(Value::as_str) == Some("result") {
                                state.saw_result = true;
                            }
                            return Some((Ok(event), state));
                        }
                        Err(err) => {
                            debug!(line = trimmed, error = %err, "Ignoring unparseable stream-json line");
                        }
                    }
                }
                Ok(None) => {
                    state.done = true;
                    return match state.finish().await {
                        Ok(()) => None,
                        Err(err) => Some((Err(err), state)),
                    };
                }
                Err(err) => {
                    state.done = true;
                    return Some((Err(BackendError::Io(err.to_string())), state));
                }
            }
        }
    })
    .boxed()
}

/// Reads a pipe to the end, keeping at most the last `max_bytes`.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, max_bytes: usize) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > max_bytes {
                    let excess = buf.len() - max_bytes;
                    buf.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
