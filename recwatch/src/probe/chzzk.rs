//! Status prober for chzzk.naver.com.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{ChannelInfo, LiveStatus, LiveStream, ProbeError, StatusProber, VideoInfo};

const API_BASE: &str = "https://api.chzzk.naver.com";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Timestamp formats seen in chzzk API responses.
const DATE_FORMATS: &[&str] = &["%y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// VOD page URLs look like https://chzzk.naver.com/video/123456
static VIDEO_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://chzzk\.naver\.com/video/(\d+)").unwrap());

/// All chzzk endpoints wrap their payload in a `content` field, which is
/// null for ids that do not exist.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    content: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContent {
    channel_id: String,
    channel_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveDetailContent {
    status: String,
    live_title: Option<String>,
    open_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoContent {
    video_title: String,
    publish_date: Option<String>,
    live_open_date: Option<String>,
    channel: VideoChannel,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoChannel {
    channel_name: String,
}

/// Prober backed by the chzzk service API.
pub struct ChzzkProber {
    client: reqwest::Client,
}

impl ChzzkProber {
    /// Create a prober with a bounded per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    async fn get_content<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, ProbeError> {
        let response = self
            .client
            .get(format!("{}{}", API_BASE, path))
            .send()
            .await?;

        // chzzk answers 404 for unknown channel/video ids.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status()));
        }

        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.content)
    }
}

#[async_trait]
impl StatusProber for ChzzkProber {
    async fn probe(&self, channel_id: &str) -> Result<LiveStatus, ProbeError> {
        let content: Option<LiveDetailContent> = self
            .get_content(&format!("/service/v1/channels/{}/live-detail", channel_id))
            .await?;

        let Some(detail) = content else {
            debug!("no live detail for channel {}", channel_id);
            return Ok(LiveStatus::Offline);
        };

        Ok(live_status_from_detail(detail))
    }

    async fn channel_info(&self, channel_id: &str) -> Result<Option<ChannelInfo>, ProbeError> {
        let content: Option<ChannelContent> = self
            .get_content(&format!("/service/v1/channels/{}", channel_id))
            .await?;

        Ok(content.map(|c| ChannelInfo {
            id: c.channel_id,
            name: c.channel_name,
        }))
    }

    async fn video_info(&self, url: &str) -> Result<Option<VideoInfo>, ProbeError> {
        let Some(captures) = VIDEO_URL.captures(url) else {
            return Ok(None);
        };
        let video_id = &captures[1];

        let content: Option<VideoContent> = self
            .get_content(&format!("/service/v1/videos/{}", video_id))
            .await?;

        Ok(content.map(|v| VideoInfo {
            title: v.video_title,
            channel_name: v.channel.channel_name,
            uploaded_at: v.publish_date.as_deref().and_then(parse_api_date),
            stream_started_at: v.live_open_date.as_deref().and_then(parse_api_date),
        }))
    }
}

fn live_status_from_detail(detail: LiveDetailContent) -> LiveStatus {
    if detail.status != "OPEN" {
        return LiveStatus::Offline;
    }

    LiveStatus::Live(LiveStream {
        title: detail.live_title.unwrap_or_default(),
        started_at: detail.open_date.as_deref().and_then(parse_api_date),
    })
}

fn parse_api_date(raw: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}
