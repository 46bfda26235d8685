//! On-demand archive (VOD) downloads.
//!
//! Downloads are one-shot, user-triggered jobs: independent of the
//! scheduler, one subprocess per job, classified by exit status, reported
//! exactly once via notification, and never retried (unlike probe
//! failures, which are retried every tick).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::notify::{NotificationEvent, NotificationHub};
use crate::probe::{ProbeError, StatusProber, VideoInfo};
use crate::recorder::launcher::{CommandSpec, ProcessLauncher, SpawnError};
use crate::utils::filename::{render_template, sanitize_filename, truncate_title, unique_path};
use crate::utils::fs::ensure_dir_all;

/// Lifecycle of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Running,
    Succeeded,
    Failed,
}

/// One invoked download command.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadJob {
    pub id: Uuid,
    pub source_url: String,
    pub quality: String,
    pub output_path: PathBuf,
    pub status: DownloadStatus,
    pub started_at: DateTime<Utc>,
}

/// Errors reported synchronously when a download request is rejected.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("'{0}' is not a downloadable video URL")]
    InvalidUrl(String),

    #[error("invalid quality '{0}'")]
    InvalidQuality(String),

    #[error("could not resolve video metadata: {0}")]
    Lookup(#[from] ProbeError),

    #[error("no usable download directory: {0}")]
    Storage(String),

    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Settings the download manager needs, distilled from the application
/// config.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub vod_template: String,
    pub time_format: String,
    pub save_root: PathBuf,
    pub fallback_to_current_dir: bool,
    pub fallback_dir: PathBuf,
    pub download_command: String,
    pub default_quality: String,
}

impl DownloadConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            vod_template: config.vod_filename_template.clone(),
            time_format: config.time_format.clone(),
            save_root: config.save_root_dir.clone(),
            fallback_to_current_dir: config.fallback_to_current_dir,
            fallback_dir: config.fallback_dir.clone(),
            download_command: config.download_command.clone(),
            default_quality: config.quality.clone(),
        }
    }
}

/// Spawns and tracks download jobs.
pub struct DownloadManager {
    config: DownloadConfig,
    prober: Arc<dyn StatusProber>,
    launcher: Arc<dyn ProcessLauncher>,
    hub: Arc<NotificationHub>,
    jobs: Arc<RwLock<HashMap<Uuid, DownloadJob>>>,
}

impl DownloadManager {
    pub fn new(
        config: DownloadConfig,
        prober: Arc<dyn StatusProber>,
        launcher: Arc<dyn ProcessLauncher>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            config,
            prober,
            launcher,
            hub,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate and start a download.
    ///
    /// Validation failures are returned synchronously and never spawn a
    /// subprocess. On success the job is accepted and runs in the
    /// background; completion arrives later as exactly one of
    /// `DownloadCompleted` / `DownloadFailed`.
    pub async fn start(
        &self,
        source_url: &str,
        quality: Option<String>,
    ) -> Result<DownloadJob, DownloadError> {
        let parsed = url::Url::parse(source_url)
            .map_err(|_| DownloadError::InvalidUrl(source_url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidUrl(source_url.to_string()));
        }

        let quality = quality.unwrap_or_else(|| self.config.default_quality.clone());
        if quality.trim().is_empty() || quality.contains(char::is_whitespace) {
            return Err(DownloadError::InvalidQuality(quality));
        }

        let video = self
            .prober
            .video_info(source_url)
            .await?
            .ok_or_else(|| DownloadError::InvalidUrl(source_url.to_string()))?;

        let output_path = self.resolve_output_path(&video).await?;

        let spec = CommandSpec::new(&self.config.download_command)
            .args(["-f", quality.as_str()])
            .args(["-o".to_string(), output_path.to_string_lossy().into_owned()])
            .arg(source_url);

        let mut process = self.launcher.launch(&spec).await?;

        let job = DownloadJob {
            id: Uuid::new_v4(),
            source_url: source_url.to_string(),
            quality,
            output_path: output_path.clone(),
            status: DownloadStatus::Running,
            started_at: Utc::now(),
        };
        self.jobs.write().insert(job.id, job.clone());

        info!(
            job = %job.id,
            url = %job.source_url,
            path = %output_path.display(),
            "download started"
        );

        // Watch the subprocess to completion off to the side; jobs run
        // concurrently with each other and with all recording sessions.
        let jobs = self.jobs.clone();
        let hub = self.hub.clone();
        let job_id = job.id;
        let job_url = job.source_url.clone();
        tokio::spawn(async move {
            let outcome = process.wait().await;

            let (status, failure) = match outcome {
                Ok(exit) if exit.success() => (DownloadStatus::Succeeded, None),
                Ok(exit) => (
                    DownloadStatus::Failed,
                    Some(format!("download tool exited with code {:?}", exit.code)),
                ),
                Err(e) => (
                    DownloadStatus::Failed,
                    Some(format!("error waiting for download tool: {}", e)),
                ),
            };

            if let Some(job) = jobs.write().get_mut(&job_id) {
                job.status = status;
            }

            match failure {
                None => {
                    let file_size_bytes = tokio::fs::metadata(&output_path)
                        .await
                        .map(|meta| meta.len())
                        .ok();
                    info!(job = %job_id, "download completed");
                    hub.publish(NotificationEvent::DownloadCompleted {
                        job_id,
                        source_url: job_url,
                        output_path: output_path.to_string_lossy().into_owned(),
                        file_size_bytes,
                        timestamp: Utc::now(),
                    });
                }
                Some(message) => {
                    warn!(job = %job_id, error = %message, "download failed");
                    hub.publish(NotificationEvent::DownloadFailed {
                        job_id,
                        source_url: job_url,
                        error: message,
                        timestamp: Utc::now(),
                    });
                }
            }
        });

        Ok(job)
    }

    /// Snapshot of all jobs, newest first.
    pub fn jobs(&self) -> Vec<DownloadJob> {
        let mut jobs: Vec<_> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    /// Look up one job.
    pub fn job(&self, id: Uuid) -> Option<DownloadJob> {
        self.jobs.read().get(&id).cloned()
    }

    async fn resolve_output_path(&self, video: &VideoInfo) -> Result<PathBuf, DownloadError> {
        let channel_dir = sanitize_filename(&video.channel_name);

        let base = if self.config.save_root.is_dir() {
            self.config.save_root.join(&channel_dir)
        } else if self.config.fallback_to_current_dir {
            warn!(
                path = %self.config.save_root.display(),
                "save directory unreachable, downloading to fallback directory"
            );
            self.config.fallback_dir.join(&channel_dir)
        } else {
            return Err(DownloadError::Storage(format!(
                "{} is unreachable and fallback is disabled",
                self.config.save_root.display()
            )));
        };

        ensure_dir_all(&base)
            .await
            .map_err(|e| DownloadError::Storage(e.to_string()))?;

        let now = Local::now();
        let format = |t: Option<chrono::NaiveDateTime>| {
            t.unwrap_or_else(|| now.naive_local())
                .format(&self.config.time_format)
                .to_string()
        };

        let escaped_title = truncate_title(&sanitize_filename(&video.title));
        let file_name = render_template(
            &self.config.vod_template,
            &[
                ("username", video.channel_name.as_str()),
                ("stream_started", format(video.stream_started_at).as_str()),
                ("download_started", now.format(&self.config.time_format).to_string().as_str()),
                ("uploaded", format(video.uploaded_at).as_str()),
                ("escaped_title", escaped_title.as_str()),
            ],
        )
        .map_err(|e| {
            // Validated at config load; a failure here is a bug.
            error!(error = %e, "vod filename template failed");
            DownloadError::Storage(e.to_string())
        })?;

        Ok(unique_path(&base.join(file_name)))
    }
}
