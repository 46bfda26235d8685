//! Application configuration.
//!
//! Every recognized option is an explicit field with a type, a default,
//! and a validation rule. The file is validated wholesale at startup: all
//! invalid fields are reported in a single error instead of failing one at
//! a time. Timestamps inside notification events are RFC 3339; the
//! configured `time_format` only shapes filenames.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::utils::filename::{LIVE_PLACEHOLDERS, VOD_PLACEHOLDERS, validate_template};
use crate::{Error, Result};

/// Minimum allowed poll interval. Lower values hammer the status API.
const MIN_INTERVAL_SECS: u64 = 5;

fn default_interval_secs() -> u64 {
    10
}

fn default_quality() -> String {
    "best".to_string()
}

fn default_live_template() -> String {
    "[{username}]{stream_started}_{escaped_title}.ts".to_string()
}

fn default_vod_template() -> String {
    "[{username}]{stream_started}_{escaped_title}.mp4".to_string()
}

fn default_time_format() -> String {
    "%y-%m-%d %H_%M_%S".to_string()
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    12590
}

fn default_capture_command() -> String {
    "streamlink".to_string()
}

fn default_download_command() -> String {
    "yt-dlp".to_string()
}

fn default_stream_url_template() -> String {
    "https://chzzk.naver.com/{channel_id}".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    15
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_spawn_warn_threshold() -> u32 {
    3
}

fn default_fallback_dir() -> PathBuf {
    PathBuf::from("fallback_recordings")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("channels.json")
}

/// Top-level configuration, loaded once at startup from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Poll interval per channel, in seconds.
    pub interval_secs: u64,
    /// Stream quality passed to the capture tool (e.g. "best", "720p").
    pub quality: String,
    /// Filename template for live recordings.
    pub live_filename_template: String,
    /// Filename template for VOD downloads.
    pub vod_filename_template: String,
    /// strftime format used for timestamps inside filenames.
    pub time_format: String,
    /// Root directory recordings are saved under (one subdir per channel).
    pub save_root_dir: PathBuf,
    /// Fall back to a local directory when the save root is unreachable.
    pub fallback_to_current_dir: bool,
    /// The local fallback directory.
    pub fallback_dir: PathBuf,
    /// Command run once when the save root is found unreachable (e.g. a
    /// remount script), before re-checking and falling back.
    pub storage_recovery_command: Option<String>,
    /// Control-plane bind address.
    pub bind_address: String,
    /// Control-plane port.
    pub port: u16,
    /// Accepted `X-API-Key` values for the command front-end. Empty
    /// disables authentication (local-only deployments).
    pub api_keys: Vec<String>,
    /// Capture tool binary.
    pub capture_command: String,
    /// VOD download tool binary.
    pub download_command: String,
    /// Template for the stream page URL handed to the capture tool.
    pub stream_url_template: String,
    /// Timeout for live-status probe requests, in seconds.
    pub probe_timeout_secs: u64,
    /// Grace period between asking a capture process to stop and killing it.
    pub stop_grace_secs: u64,
    /// Consecutive capture spawn failures before a warning notification.
    pub spawn_warn_threshold: u32,
    /// Stop in-flight recordings on shutdown instead of leaving the capture
    /// processes running detached.
    pub stop_recordings_on_exit: bool,
    /// Path of the persisted channel registry.
    pub registry_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            quality: default_quality(),
            live_filename_template: default_live_template(),
            vod_filename_template: default_vod_template(),
            time_format: default_time_format(),
            save_root_dir: PathBuf::new(),
            fallback_to_current_dir: default_true(),
            fallback_dir: default_fallback_dir(),
            storage_recovery_command: None,
            bind_address: default_bind_address(),
            port: default_port(),
            api_keys: Vec::new(),
            capture_command: default_capture_command(),
            download_command: default_download_command(),
            stream_url_template: default_stream_url_template(),
            probe_timeout_secs: default_probe_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            spawn_warn_threshold: default_spawn_warn_threshold(),
            stop_recordings_on_exit: false,
            registry_path: default_registry_path(),
        }
    }
}

impl Config {
    /// Load and validate the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::utils::fs::io_error("reading config file", path, e))?;

        let mut config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration file for the operator to edit.
    pub fn write_default(path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&Config::default())?;
        std::fs::write(path, json)
            .map_err(|e| crate::utils::fs::io_error("writing config file", path, e))
    }

    /// Validate every field, collecting all failures into one error.
    ///
    /// The one exception to wholesale rejection is the poll interval, which
    /// is clamped to the minimum with a warning instead of rejected.
    pub fn validate(&mut self) -> Result<()> {
        let mut problems = Vec::new();

        if self.interval_secs < MIN_INTERVAL_SECS {
            warn!(
                "interval_secs {} is below the minimum; clamping to {}",
                self.interval_secs, MIN_INTERVAL_SECS
            );
            self.interval_secs = MIN_INTERVAL_SECS;
        }

        if self.quality.trim().is_empty() {
            problems.push("quality: must not be empty".to_string());
        }

        if let Err(e) = validate_template(&self.live_filename_template, LIVE_PLACEHOLDERS) {
            problems.push(format!("live_filename_template: {}", e));
        }

        if let Err(e) = validate_template(&self.vod_filename_template, VOD_PLACEHOLDERS) {
            problems.push(format!("vod_filename_template: {}", e));
        }

        if !is_valid_strftime(&self.time_format) {
            problems.push(format!(
                "time_format: invalid strftime format '{}'",
                self.time_format
            ));
        }

        if self.save_root_dir.as_os_str().is_empty() {
            problems.push("save_root_dir: must be set".to_string());
        }

        if format!("{}:{}", self.bind_address, self.port)
            .parse::<SocketAddr>()
            .is_err()
        {
            problems.push(format!(
                "bind_address/port: '{}:{}' is not a valid socket address",
                self.bind_address, self.port
            ));
        }

        if self.capture_command.trim().is_empty() {
            problems.push("capture_command: must not be empty".to_string());
        }

        if self.download_command.trim().is_empty() {
            problems.push("download_command: must not be empty".to_string());
        }

        if !self.stream_url_template.contains("{channel_id}") {
            problems.push("stream_url_template: must contain {channel_id}".to_string());
        }

        if self.probe_timeout_secs == 0 {
            problems.push("probe_timeout_secs: must be at least 1".to_string());
        }

        if self.spawn_warn_threshold == 0 {
            problems.push("spawn_warn_threshold: must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "invalid configuration: {}",
                problems.join("; ")
            )))
        }
    }

    /// Verify the save root is usable, or that falling back is allowed.
    ///
    /// Called once at startup. Runtime unavailability is handled per
    /// recording through the recovery-command/fallback path instead.
    pub fn check_storage(&self) -> Result<()> {
        if self.save_root_dir.is_dir() {
            return Ok(());
        }

        if self.fallback_to_current_dir {
            warn!(
                "save directory {} is unreachable; recordings will use the fallback directory \
                 until it comes back",
                self.save_root_dir.display()
            );
            Ok(())
        } else {
            Err(Error::StorageUnavailable {
                path: self.save_root_dir.clone(),
            })
        }
    }

    /// Stream page URL for a channel, from the configured template.
    pub fn stream_url(&self, channel_id: &str) -> String {
        self.stream_url_template.replace("{channel_id}", channel_id)
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn stop_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stop_grace_secs)
    }
}

/// Check a strftime format string for invalid specifiers.
fn is_valid_strftime(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}
