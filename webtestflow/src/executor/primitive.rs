//! The execution primitive.

use super::backend::{BackendRequest, ToolBackend};
use super::fingerprint::{verify_side_effect, OutputFingerprint};
use super::request::{ExecutionRequest, ExecutionResult};
use crate::artifacts::ArtifactLayout;
use crate::cancellation::CancellationToken;
use crate::errors::ExecutionError;
use crate::events::{EventSink, NoOpEventSink};
use crate::messages::{interpret, render_event, StreamAnalyzer, StreamOutcome, StreamSummary};
use crate::observability::SpanTimer;
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sends one instruction to a [`ToolBackend`] and confirms its side effect.
///
/// Success requires both a non-error end of the event stream and an observed
/// change of the expected output on disk. The backend's own claim of having
/// written a file is recorded but never trusted on its own.
pub struct ExecutionPrimitive {
    backend: Arc<dyn ToolBackend>,
    work_dir: PathBuf,
    responses_dir: PathBuf,
    event_sink: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl std::fmt::Debug for ExecutionPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPrimitive")
            .field("backend", &self.backend.name())
            .field("work_dir", &self.work_dir)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ExecutionPrimitive {
    /// Creates a primitive working inside `layout`'s work directory.
    #[must_use]
    pub fn new(backend: Arc<dyn ToolBackend>, layout: &ArtifactLayout) -> Self {
        Self {
            backend,
            work_dir: layout.work_dir().to_path_buf(),
            responses_dir: layout.responses_dir(),
            event_sink: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the sink that receives transcript lines.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Shares a cancellation token with the caller.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Returns the work directory.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Executes one request.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::Timeout`] if the time budget elapsed or the token
    ///   was cancelled; the backend call is dropped and its process killed
    /// - [`ExecutionError::BackendFailure`] if the backend could not start,
    ///   broke its stream, or ended with an error
    /// - [`ExecutionError::SideEffectNotConfirmed`] if the call ended cleanly
    ///   but the expected output did not appear or change
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        let timer = SpanTimer::start(&request.label);
        let execution_id = Uuid::new_v4();
        info!(
            label = %request.label,
            execution_id = %execution_id,
            backend = self.backend.name(),
            expected = %request.expected,
            timeout_secs = request.timeout.as_secs_f64(),
            "Starting execution"
        );

        if self.cancel.is_cancelled() {
            return Err(self.abandoned(request, &timer, true));
        }
        tokio::fs::create_dir_all(&self.work_dir).await.map_err(|e| {
            ExecutionError::backend(&request.label, format!("cannot create work directory: {e}"))
        })?;

        let before = OutputFingerprint::capture(&self.work_dir, &request.expected).await;

        // The analyzer outlives an abandoned call so its partial text is audited.
        let mut analyzer = StreamAnalyzer::new(&self.work_dir, request.expected.clone());
        let abandoned = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(true),
            consumed = tokio::time::timeout(request.timeout, self.consume(request, &mut analyzer)) => {
                consumed.err().map(|_| false)
            }
        };
        let summary = analyzer.finish();

        if let Some(cancelled) = abandoned {
            let reason = if cancelled { "cancelled" } else { "timed out" };
            self.persist_response(request, execution_id, &summary, Some(reason))
                .await;
            return Err(self.abandoned(request, &timer, cancelled));
        }

        let audit_path = self
            .persist_response(request, execution_id, &summary, None)
            .await;

        match &summary.outcome {
            StreamOutcome::Completed => {}
            StreamOutcome::Failed(reason) => {
                warn!(label = %request.label, reason = %reason, "Backend call failed");
                return Err(ExecutionError::backend(&request.label, reason.clone()));
            }
            StreamOutcome::Truncated => {
                warn!(label = %request.label, "Backend stream ended without a result");
                return Err(ExecutionError::backend(
                    &request.label,
                    "stream ended without a result event",
                ));
            }
        }

        let after = OutputFingerprint::capture(&self.work_dir, &request.expected).await;
        let changed_files = after.changed_since(&before);
        let side_effect_confirmed = verify_side_effect(&before, &after);

        if request.expected.expects_write() && !side_effect_confirmed {
            warn!(
                label = %request.label,
                expected = %request.expected,
                write_claimed = summary.write_claimed,
                "Backend reported success but the expected output did not change"
            );
            return Err(ExecutionError::SideEffectNotConfirmed {
                label: request.label.clone(),
                expected: request.expected.to_string(),
            });
        }
        if request.expected.expects_write() && !summary.write_claimed {
            debug!(
                label = %request.label,
                "Output changed without a matching write tool call"
            );
        }

        let duration_ms = timer.finish();
        info!(
            label = %request.label,
            execution_id = %execution_id,
            duration_ms,
            changed_files = changed_files.len(),
            tool_errors = summary.tool_errors.len(),
            "Execution completed"
        );

        Ok(ExecutionResult {
            execution_id,
            response: summary.response,
            side_effect_confirmed,
            write_claimed: summary.write_claimed,
            changed_files,
            tool_errors: summary.tool_errors,
            audit_path,
            duration_ms,
        })
    }

    /// Runs the backend call and drains its events through both consumers.
    async fn consume(&self, request: &ExecutionRequest, analyzer: &mut StreamAnalyzer) {
        let backend_request = BackendRequest {
            label: request.label.clone(),
            instruction: request.instruction.clone(),
            work_dir: self.work_dir.clone(),
        };

        let raw = match self.backend.start(&backend_request).await {
            Ok(raw) => raw,
            Err(err) => {
                analyzer.observe_error(&err);
                return;
            }
        };

        let mut events = interpret(raw);
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if let Some(line) = render_event(&event) {
                        self.event_sink.try_emit(
                            "execution.transcript",
                            Some(json!({ "label": request.label, "line": line })),
                        );
                    }
                    analyzer.observe(&event);
                }
                Err(err) => {
                    analyzer.observe_error(&err);
                    break;
                }
            }
        }
    }

    fn abandoned(&self, request: &ExecutionRequest, timer: &SpanTimer, cancelled: bool) -> ExecutionError {
        let after_seconds = timer.elapsed().as_secs_f64();
        warn!(
            label = %request.label,
            after_seconds,
            cancelled,
            reason = ?self.cancel.reason(),
            "Abandoning backend call"
        );
        ExecutionError::Timeout {
            label: request.label.clone(),
            after_seconds,
            cancelled,
        }
    }

    /// Writes the raw response for audit. Failures are logged, not raised.
    ///
    /// `abandoned` names why the call was cut short, if it was.
    async fn persist_response(
        &self,
        request: &ExecutionRequest,
        execution_id: Uuid,
        summary: &StreamSummary,
        abandoned: Option<&str>,
    ) -> Option<PathBuf> {
        let now = Utc::now();
        let file_name = format!(
            "{}-{}-{}.txt",
            sanitize_label(&request.label),
            now.format("%Y%m%dT%H%M%S%.3fZ"),
            execution_id.simple()
        );
        let path = self.responses_dir.join(file_name);

        let mut body = String::new();
        let _ = writeln!(body, "label: {}", request.label);
        let _ = writeln!(body, "execution_id: {execution_id}");
        let _ = writeln!(body, "recorded_at: {}", now.to_rfc3339());
        let _ = writeln!(body, "outcome: {:?}", summary.outcome);
        if let Some(reason) = abandoned {
            let _ = writeln!(body, "abandoned: {reason}");
        }
        let _ = writeln!(body, "write_claimed: {}", summary.write_claimed);
        for error in &summary.tool_errors {
            let _ = writeln!(body, "tool_error: {error}");
        }
        body.push('\n');
        body.push_str(&summary.response);

        let written: std::io::Result<()> = async {
            tokio::fs::create_dir_all(&self.responses_dir).await?;
            tokio::fs::write(&path, body).await
        }
        .await;
        match written {
            Ok(()) => {
                debug!(path = %path.display(), "Persisted backend response");
                Some(path)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Could not persist backend response");
                None
            }
        }
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
