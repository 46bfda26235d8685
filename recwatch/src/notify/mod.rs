//! Lifecycle notification events and their fan-out hub.
//!
//! Every recording start/stop and every download completion/failure
//! produces exactly one event. Producers publish into a broadcast channel;
//! consumers (the control plane's WebSocket subscribers) each hold their
//! own receiver, so a slow or absent consumer can never block a producer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Buffered events per subscriber before the oldest are dropped.
const HUB_CAPACITY: usize = 256;

/// Events emitted by the recording engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A capture subprocess was started for a live channel.
    RecordingStarted {
        channel_id: String,
        channel_name: String,
        title: String,
        output_path: String,
        stream_started_at: Option<DateTime<Utc>>,
        record_started_at: DateTime<Utc>,
    },
    /// A capture subprocess exited, cleanly or otherwise.
    RecordingStopped {
        channel_id: String,
        channel_name: String,
        output_path: String,
        duration_secs: f64,
        file_size_bytes: Option<u64>,
        timestamp: DateTime<Utc>,
    },
    /// The capture tool repeatedly failed to start for a live channel.
    /// Emitted once per live session when the failure threshold is hit;
    /// spawning keeps being retried until the channel goes offline.
    CaptureStalled {
        channel_id: String,
        channel_name: String,
        consecutive_failures: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The save directory was unreachable and the recording went to the
    /// fallback directory instead.
    StorageFallback {
        channel_id: String,
        channel_name: String,
        output_dir: String,
        timestamp: DateTime<Utc>,
    },
    /// An archive download finished successfully.
    DownloadCompleted {
        job_id: Uuid,
        source_url: String,
        output_path: String,
        file_size_bytes: Option<u64>,
        timestamp: DateTime<Utc>,
    },
    /// An archive download failed. Downloads are one-shot: this is
    /// reported once and not retried.
    DownloadFailed {
        job_id: Uuid,
        source_url: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl NotificationEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RecordingStarted { .. } => "recording_started",
            Self::RecordingStopped { .. } => "recording_stopped",
            Self::CaptureStalled { .. } => "capture_stalled",
            Self::StorageFallback { .. } => "storage_fallback",
            Self::DownloadCompleted { .. } => "download_completed",
            Self::DownloadFailed { .. } => "download_failed",
        }
    }
}

/// Broadcast fan-out point for notification events.
pub struct NotificationHub {
    tx: broadcast::Sender<NotificationEvent>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Publishing never blocks and never fails: with no subscribers the
    /// event is simply dropped after logging.
    pub fn publish(&self, event: NotificationEvent) {
        debug!(kind = event.kind(), "notification event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events from this point onward.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
