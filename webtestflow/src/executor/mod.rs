//! The execution primitive: one instruction, one backend call, one confirmed
//! side effect.
//!
//! An [`ExecutionPrimitive`] sends an [`ExecutionRequest`] to a
//! [`ToolBackend`], consumes the structured event stream, and only reports
//! success when the backend ended without error *and* the expected output
//! was created or changed on disk.

mod backend;
mod claude;
mod fingerprint;
mod primitive;
mod request;

pub use backend::{BackendRequest, RawEvent, RawEventStream, ToolBackend};
pub use claude::{ClaudeCliBackend, DEFAULT_PROGRAM};
pub use fingerprint::{verify_side_effect, OutputFingerprint};
pub use primitive::ExecutionPrimitive;
pub use request::{ExecutionRequest, ExecutionResult, ExpectedOutput};
