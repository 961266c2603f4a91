//! Event sinks for pipeline progress.
//!
//! The orchestrator and the execution primitive report progress through an
//! [`EventSink`] handed to them at construction. There is no global sink.
//!
//! Event types emitted by the crate:
//! - `pipeline.started`, `pipeline.completed`, `pipeline.failed`
//! - `stage.started`, `stage.attempt_failed`, `stage.completed`
//! - `execution.transcript`

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
