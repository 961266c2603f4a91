//! Interpretation of the backend's structured event stream.
//!
//! Raw backend events are classified into [`ToolEvent`]s by the
//! [`interpreter`]. Two independent consumers read those events:
//! - [`StreamAnalyzer`] decides whether the call completed and whether a write
//!   was claimed (control path)
//! - [`display`] renders a transcript for operators (presentation path)

mod analyzer;
pub mod display;
mod event;
mod interpreter;

pub use analyzer::{StreamAnalyzer, StreamOutcome, StreamSummary};
pub use display::{render_event, Transcript};
pub use event::{ToolEvent, WRITE_TOOLS};
pub use interpreter::{classify, interpret, ToolEventStream};
