//! Pipeline orchestration.
//!
//! This module provides:
//! - The orchestrator state machine that sequences the five stages
//! - A builder that validates the agent set
//! - Retry budgets and backoff between attempts

mod builder;
mod orchestrator;
mod retry;

#[cfg(test)]
mod integration_tests;

pub use builder::OrchestratorBuilder;
pub use orchestrator::{PipelineOrchestrator, PipelineReport, StageReport};
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig};
