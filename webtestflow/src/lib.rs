//! # Webtestflow
//!
//! Resumable orchestration of LLM-executed web test pipelines.
//!
//! A run moves through five ordered stages, each handing its result to the
//! next only through an artifact on disk:
//!
//! 1. **Analyze website** writes `website-analysis.json`
//! 2. **Generate scenarios** writes `test-scenarios.json`
//! 3. **Generate test cases** writes runnable files into `test-cases/`
//! 4. **Run tests** writes `test-results.json`
//! 5. **Analyze results** writes `test-report.md`
//!
//! The work is done by an agentic CLI backend. Its claims are never trusted:
//! a stage only succeeds once the expected file has changed on disk and
//! passes its validity check. Because progress is derived from the work
//! directory alone, an interrupted run resumes at the first missing or
//! invalid artifact.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use webtestflow::prelude::*;
//! use std::sync::Arc;
//!
//! init_tracing(LogFormat::Pretty, None)?;
//! let config = PipelineConfig::load("webtestflow.json")?.apply_env()?;
//! let orchestrator =
//!     PipelineOrchestrator::from_config(&config, Arc::new(LoggingEventSink::default()))?;
//!
//! match orchestrator.resume().await {
//!     Ok(report) => println!("done: {} stage(s) run", report.executed.len()),
//!     Err(failed) => eprintln!("{failed}; resume later at {:?}", failed.last_state.next_step),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod agents;
pub mod artifacts;
pub mod calibration;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod messages;
pub mod observability;
pub mod pipeline;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::agents::{standard_agents, ArtifactAgent, StageAgent, StageRunContext};
    pub use crate::artifacts::{
        ArtifactInspector, ArtifactLayout, PriorArtifacts, RunState, ValidatedArtifact,
    };
    pub use crate::calibration::{
        AttemptOutcome, Calibrator, FixedCalibrator, HistoryCalibrator,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{PipelineConfig, StageTimeouts};
    pub use crate::core::{PipelineStage, PipelineState};
    pub use crate::errors::{
        ArtifactInvalid, ExecutionError, FailureKind, PipelineFailed, StageError,
        WebtestError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{
        ClaudeCliBackend, ExecutionPrimitive, ExecutionRequest, ExecutionResult,
        ExpectedOutput, ToolBackend,
    };
    pub use crate::messages::ToolEvent;
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        OrchestratorBuilder, PipelineOrchestrator, PipelineReport, RetryConfig,
    };
}
