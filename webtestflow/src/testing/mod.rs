//! Testing utilities for webtestflow pipelines.
//!
//! This module provides:
//! - [`ScriptedBackend`], a [`ToolBackend`](crate::executor::ToolBackend)
//!   that replays queued turns and performs their file writes
//! - [`claude_events`] builders for raw stream-json events
//! - [`fixtures`] with valid and invalid artifact content per stage

pub mod claude_events;
pub mod fixtures;
mod scripted;

pub use scripted::{ScriptedBackend, ScriptedTurn};
