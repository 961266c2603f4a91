//! A backend that replays scripted turns.

use crate::errors::BackendError;
use crate::executor::{BackendRequest, RawEvent, RawEventStream, ToolBackend};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

/// One scripted backend call.
///
/// When the call's stream is first polled the turn waits `delay`, performs its
/// file writes relative to the work directory, then yields its events. A turn
/// with a stall keeps the stream open that long after its last event.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    events: Vec<Result<RawEvent, BackendError>>,
    writes: Vec<(PathBuf, String)>,
    delay: Option<Duration>,
    stall: Option<Duration>,
    start_error: Option<BackendError>,
}

impl ScriptedTurn {
    /// Creates an empty turn.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw event.
    #[must_use]
    pub fn event(mut self, event: RawEvent) -> Self {
        self.events.push(Ok(event));
        self
    }

    /// Appends a stream error.
    #[must_use]
    pub fn stream_error(mut self, error: BackendError) -> Self {
        self.events.push(Err(error));
        self
    }

    /// Writes `content` to `path` (relative to the work directory).
    #[must_use]
    pub fn write(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.writes.push((path.into(), content.into()));
        self
    }

    /// Delays the first event.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Keeps the stream open for `stall` after the last event, like a
    /// backend that hangs mid-call.
    #[must_use]
    pub fn stall(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }

    /// Makes the call fail before streaming.
    #[must_use]
    pub fn fail_to_start(mut self, error: BackendError) -> Self {
        self.start_error = Some(error);
        self
    }
}

/// A [`ToolBackend`] that pops one [`ScriptedTurn`] per call.
///
/// Calls beyond the queued turns are rejected.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    /// Creates a backend with no queued turns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a turn.
    pub fn push(&self, turn: ScriptedTurn) {
        self.turns.lock().push_back(turn);
    }

    /// Queues a turn, builder style.
    #[must_use]
    pub fn with_turn(self, turn: ScriptedTurn) -> Self {
        self.push(turn);
        self
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the number of turns not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.turns.lock().len()
    }
}

#[async_trait]
impl ToolBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self, request: &BackendRequest) -> Result<RawEventStream, BackendError> {
        self.requests.lock().push(request.clone());
        let turn = self
            .turns
            .lock()
            .pop_front()
            .ok_or_else(|| BackendError::Rejected(format!("no scripted turn left for '{}'", request.label)))?;
        let ScriptedTurn {
            events,
            writes,
            delay,
            stall,
            start_error,
        } = turn;
        if let Some(error) = start_error {
            return Err(error);
        }

        let work_dir = request.work_dir.clone();
        let prelude = stream::once(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            for (rel, content) in writes {
                let path = work_dir.join(rel);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, content).await?;
            }
            Ok::<(), std::io::Error>(())
        })
        .filter_map(|written| async move {
            written
                .err()
                .map(|e| Err::<RawEvent, BackendError>(BackendError::Io(e.to_string())))
        });

        let hang = stream::once(async move {
            if let Some(stall) = stall {
                tokio::time::sleep(stall).await;
            }
        })
        .filter_map(|()| async { None::<Result<RawEvent, BackendError>> });

        Ok(prelude.chain(stream::iter(events)).chain(hang).boxed())
    }
}
