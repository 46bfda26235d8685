//! Live-status probing.
//!
//! The prober is the only component talking to the streaming platform's
//! API. It is treated as an unreliable external dependency: every error it
//! returns is transient by policy — logged by the caller, retried on the
//! next poll, and never allowed to tear down an in-progress recording.

mod chzzk;

pub use chzzk::ChzzkProber;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

/// Result of probing a channel's live status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    /// Channel is not broadcasting.
    Offline,
    /// Channel is broadcasting.
    Live(LiveStream),
}

impl LiveStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, LiveStatus::Live(_))
    }
}

/// Details of a broadcast in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStream {
    /// Raw stream title as reported by the platform.
    pub title: String,
    /// When the broadcast started, if the platform reports it.
    pub started_at: Option<NaiveDateTime>,
}

/// Identity of a channel as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

/// Metadata of a past broadcast available for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    pub title: String,
    pub channel_name: String,
    /// When the VOD was published.
    pub uploaded_at: Option<NaiveDateTime>,
    /// When the original broadcast started.
    pub stream_started_at: Option<NaiveDateTime>,
}

/// Error type for probe operations. Always transient from the caller's
/// point of view.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("unexpected response shape: {0}")]
    Decode(String),
}

/// Live-status provider for one streaming platform.
#[async_trait]
pub trait StatusProber: Send + Sync + 'static {
    /// Query whether a channel is currently broadcasting.
    async fn probe(&self, channel_id: &str) -> Result<LiveStatus, ProbeError>;

    /// Resolve a channel id to its identity.
    ///
    /// Returns `Ok(None)` when the platform has no such channel — the
    /// distinction between "invalid id" and "API unreachable" matters to
    /// the add-channel command.
    async fn channel_info(&self, channel_id: &str) -> Result<Option<ChannelInfo>, ProbeError>;

    /// Resolve a VOD URL to its metadata.
    ///
    /// Returns `Ok(None)` when the URL does not denote a video on this
    /// platform.
    async fn video_info(&self, url: &str) -> Result<Option<VideoInfo>, ProbeError>;
}
