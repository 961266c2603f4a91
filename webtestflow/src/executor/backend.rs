//! The seam between the execution primitive and the agentic tool.

use crate::errors::BackendError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt::Debug;
use std::path::PathBuf;

/// One raw structured event, as emitted by the backend.
pub type RawEvent = serde_json::Value;

/// The raw event stream of one backend call.
///
/// Dropping the stream must stop the underlying call.
pub type RawEventStream = BoxStream<'static, Result<RawEvent, BackendError>>;

/// What the backend is asked to do.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Label of the originating request.
    pub label: String,
    /// Natural-language instruction.
    pub instruction: String,
    /// Directory the backend works in.
    pub work_dir: PathBuf,
}

/// An agentic tool that executes instructions by invoking file and shell tools.
#[async_trait]
pub trait ToolBackend: Send + Sync + Debug {
    /// Returns the backend name for logging.
    fn name(&self) -> &str;

    /// Starts a call and returns its event stream.
    async fn start(&self, request: &BackendRequest) -> Result<RawEventStream, BackendError>;
}
