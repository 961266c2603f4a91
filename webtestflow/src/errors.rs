//! Error types for the webtestflow pipeline.
//!
//! The taxonomy follows the layering of the pipeline: the execution primitive
//! raises [`ExecutionError`], stage agents wrap it in [`StageError`], and the
//! orchestrator surfaces terminal failure as [`PipelineFailed`].

use crate::artifacts::RunState;
use crate::core::PipelineStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The crate-level error type for setup and configuration failures.
#[derive(Debug, Error)]
pub enum WebtestError {
    /// The orchestrator could not be assembled.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when an orchestrator is built without a complete set of agents.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<PipelineStage>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<PipelineStage>) -> Self {
        self.stages = stages;
        self
    }
}

/// Why an on-disk artifact was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactInvalid {
    /// The artifact does not exist.
    #[error("{} is missing", path.display())]
    Missing {
        /// The expected path.
        path: PathBuf,
    },

    /// The artifact exists but holds no content.
    #[error("{} is empty", path.display())]
    Empty {
        /// The artifact path.
        path: PathBuf,
    },

    /// The artifact content does not match its schema.
    #[error("{} is malformed: {reason}", path.display())]
    Malformed {
        /// The artifact path.
        path: PathBuf,
        /// What the check rejected.
        reason: String,
    },

    /// The artifact declares a schema version this crate does not read.
    #[error("{} has unsupported schema_version {found} (expected {expected})", path.display())]
    UnsupportedVersion {
        /// The artifact path.
        path: PathBuf,
        /// The version found in the file.
        found: u64,
        /// The version this crate reads.
        expected: u32,
    },

    /// The artifact could not be read.
    #[error("{} could not be read: {reason}", path.display())]
    Io {
        /// The artifact path.
        path: PathBuf,
        /// The underlying IO error message.
        reason: String,
    },
}

impl ArtifactInvalid {
    /// Creates a malformed-artifact error.
    #[must_use]
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns the path of the rejected artifact.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Missing { path }
            | Self::Empty { path }
            | Self::Malformed { path, .. }
            | Self::UnsupportedVersion { path, .. }
            | Self::Io { path, .. } => path,
        }
    }
}

/// Errors raised by the execution primitive.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// The backend call was abandoned after its time budget or on cancellation.
    #[error("Execution '{label}' timed out after {after_seconds:.1}s{}", if *cancelled { " (cancelled)" } else { "" })]
    Timeout {
        /// The request label.
        label: String,
        /// Seconds elapsed before the call was abandoned.
        after_seconds: f64,
        /// True when a cancellation request, not the deadline, ended the call.
        cancelled: bool,
    },

    /// The backend failed to start, broke its stream, or reported an error.
    #[error("Backend failure during '{label}': {reason}")]
    BackendFailure {
        /// The request label.
        label: String,
        /// The failure description.
        reason: String,
    },

    /// The backend reported success but the expected file was not created or changed.
    #[error("Execution '{label}' reported success but {expected} was not written")]
    SideEffectNotConfirmed {
        /// The request label.
        label: String,
        /// Description of the expected output.
        expected: String,
    },
}

impl ExecutionError {
    /// Creates a backend failure error.
    #[must_use]
    pub fn backend(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendFailure {
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Returns the flattened failure kind.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { cancelled: true, .. } => FailureKind::Cancelled,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::BackendFailure { .. } => FailureKind::BackendFailure,
            Self::SideEffectNotConfirmed { .. } => FailureKind::SideEffectNotConfirmed,
        }
    }
}

/// Errors raised by a stage agent.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// A required upstream artifact is missing or invalid; nothing was executed.
    #[error("Stage {stage} cannot start: upstream {upstream} artifact invalid: {source}")]
    InvalidInput {
        /// The stage that refused to run.
        stage: PipelineStage,
        /// The upstream stage whose artifact is unusable.
        upstream: PipelineStage,
        /// Why the upstream artifact was rejected.
        source: ArtifactInvalid,
    },

    /// The execution primitive failed.
    #[error("Stage {stage} execution failed: {source}")]
    ExecutionFailed {
        /// The failing stage.
        stage: PipelineStage,
        /// The primitive's error, unchanged.
        source: ExecutionError,
    },

    /// The artifact was written but does not pass its validity check.
    #[error("Stage {stage} produced an invalid artifact: {source}")]
    ValidationFailed {
        /// The failing stage.
        stage: PipelineStage,
        /// Why the produced artifact was rejected.
        source: ArtifactInvalid,
    },
}

impl StageError {
    /// Returns the stage that raised the error.
    #[must_use]
    pub const fn stage(&self) -> PipelineStage {
        match self {
            Self::InvalidInput { stage, .. }
            | Self::ExecutionFailed { stage, .. }
            | Self::ValidationFailed { stage, .. } => *stage,
        }
    }

    /// Returns true if retrying the stage cannot help.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::ExecutionFailed {
                    source: ExecutionError::Timeout { cancelled: true, .. },
                    ..
                }
        )
    }

    /// Returns the flattened failure kind.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput { .. } => FailureKind::InvalidInput,
            Self::ExecutionFailed { source, .. } => source.kind(),
            Self::ValidationFailed { .. } => FailureKind::ValidationFailed,
        }
    }
}

/// Flattened error kind reported to callers and recorded by the calibrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream artifact missing or invalid.
    InvalidInput,
    /// The backend call exceeded its budget.
    Timeout,
    /// The run was cancelled.
    Cancelled,
    /// The backend failed.
    BackendFailure,
    /// The expected file never appeared or changed.
    SideEffectNotConfirmed,
    /// The produced artifact failed validation.
    ValidationFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid_input",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::BackendFailure => "backend_failure",
            Self::SideEffectNotConfirmed => "side_effect_not_confirmed",
            Self::ValidationFailed => "validation_failed",
        };
        f.write_str(s)
    }
}

/// Terminal failure of a pipeline run.
///
/// Carries the failed stage, the last error, and the artifact state observed
/// after the failure so callers can show what survived on disk.
#[derive(Debug, Clone, Error)]
#[error("Pipeline failed at {stage} after {attempts} attempt(s): {cause}")]
pub struct PipelineFailed {
    /// The stage that failed.
    pub stage: PipelineStage,
    /// The error of the last attempt.
    pub cause: StageError,
    /// How many attempts were made.
    pub attempts: usize,
    /// The artifact state recomputed after the failure.
    pub last_state: RunState,
}

impl PipelineFailed {
    /// Returns the flattened kind of the failure cause.
    #[must_use]
    pub const fn error_kind(&self) -> FailureKind {
        self.cause.kind()
    }
}

/// Errors produced by a tool backend while starting or streaming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend process could not be started.
    #[error("failed to start backend '{program}': {reason}")]
    Spawn {
        /// The program that was spawned.
        program: String,
        /// The spawn error.
        reason: String,
    },

    /// Reading the event stream failed.
    #[error("backend stream IO error: {0}")]
    Io(String),

    /// The backend process exited unsuccessfully.
    #[error("backend exited with status {code:?}: {stderr}")]
    Exited {
        /// The exit code, if any.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// A scripted or remote backend refused the request.
    #[error("backend rejected request: {0}")]
    Rejected(String),
}
