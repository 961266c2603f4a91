//! Core domain model types for webtestflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - The ordered pipeline stage enum
//! - The orchestrator's state machine states

mod stage;
mod state;

pub use stage::{PipelineStage, UnknownStageError};
pub use state::PipelineState;
