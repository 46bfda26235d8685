//! Per-channel recording sessions.
//!
//! - `launcher`: the subprocess capability seam (spawn/wait/stop), so tests
//!   can substitute fakes for the capture tool
//! - `session`: the per-channel actor driving the Idle → LiveNotRecording
//!   → Recording state machine and owning the capture subprocess

pub mod launcher;
pub mod session;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use launcher::{CaptureProcess, CommandSpec, ProcessExit, ProcessLauncher, SpawnError, TokioLauncher};
pub use session::{ChannelMessage, ChannelSession, SessionConfig, SessionHandle};

/// Runtime status of a channel. Exactly one state per channel at any
/// instant; kept in the channel's session, not in the registry entry, so
/// identity and runtime status stay separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Not broadcasting.
    Idle,
    /// Broadcast detected, capture not yet confirmed started.
    LiveNotRecording,
    /// Capture subprocess running.
    Recording,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::LiveNotRecording => "live_not_recording",
            Self::Recording => "recording",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Book-keeping for one capture, created on entry to `Recording` and
/// destroyed when the capture subprocess exits or is force-stopped.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub channel_id: String,
    pub title: String,
    /// Computed once when the capture is spawned; never changes afterwards.
    pub output_path: PathBuf,
    pub stream_started_at: Option<DateTime<Utc>>,
    pub record_started_at: DateTime<Utc>,
}
