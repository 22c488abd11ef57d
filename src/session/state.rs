//! Session states and the signals exposed to the host UI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::capture::SourceKind;
use crate::error::UploaderError;
use crate::pipeline::PipelineStats;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Stopping,
    /// A start or resume failed; cleanup is in progress
    Error,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Streaming)
                | (Starting, Stopping)
                | (Starting, Error)
                | (Streaming, Stopping)
                | (Streaming, Error)
                | (Stopping, Idle)
                | (Error, Idle)
        )
    }

    /// States in which the session holds capture resources
    pub fn holds_resources(self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Notifications published by a session controller
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Forwarded from the uploader without interpretation
    UploaderFailure(UploaderError),
    /// The snapshot directory could not be created; streaming continues
    SnapshotUnavailable { reason: String },
    /// Capture paused while the host is in the background
    SourceSuspended(SourceKind),
    /// Capture resumed after returning to the foreground
    SourceResumed(SourceKind),
}

/// Point-in-time view of a session for display
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    /// Endpoint with its stream key masked
    pub endpoint: Option<String>,
    pub source: Option<SourceKind>,
    pub source_acquired: bool,
    pub foreground: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub pipeline: Option<PipelineStats>,
    pub last_error: Option<String>,
}
