//! Per-channel recording session actor.
//!
//! Each registered channel gets one `ChannelSession` running as its own
//! tokio task. The session polls the status prober on its own timer,
//! drives the Idle → LiveNotRecording → Recording state machine, owns the
//! capture subprocess, and emits lifecycle notifications. Within one
//! channel every transition is strictly sequential; channels never block
//! each other.
//!
//! Two policies worth calling out:
//!
//! - An `Offline` probe result while `Recording` does NOT stop the
//!   capture: the probe can report offline transiently before the stream
//!   actually ends, so the capture subprocess's own exit is authoritative.
//!   The only forced-stop path is explicit removal.
//! - A failed capture spawn keeps the session in `LiveNotRecording` and is
//!   retried every tick until the channel goes offline; after
//!   `spawn_warn_threshold` consecutive failures a single `CaptureStalled`
//!   warning is emitted for that live session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::launcher::{CaptureProcess, CommandSpec, ProcessExit, ProcessLauncher};
use super::{ChannelState, RecordingSession};
use crate::config::Config;
use crate::notify::{NotificationEvent, NotificationHub};
use crate::probe::{LiveStatus, StatusProber};
use crate::registry::Channel;
use crate::utils::filename::{render_template, sanitize_filename, truncate_title, unique_path};
use crate::utils::fs::ensure_dir_all;

const MAILBOX_CAPACITY: usize = 16;

/// Upper bound on a storage recovery command run.
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Messages accepted by a channel session.
#[derive(Debug)]
pub enum ChannelMessage {
    /// Run a poll cycle immediately instead of waiting for the timer.
    PollNow,
    /// Stop the session, force-stopping any capture in progress. The reply
    /// is sent only after the capture subprocess has fully terminated.
    Stop { reply: oneshot::Sender<()> },
    /// Query the current state.
    GetState { reply: oneshot::Sender<ChannelState> },
}

/// Handle for sending messages to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<ChannelMessage>,
}

impl SessionHandle {
    /// Trigger an immediate poll cycle.
    pub async fn poll_now(&self) {
        let _ = self.tx.send(ChannelMessage::PollNow).await;
    }

    /// Current state, or `None` if the session is gone.
    pub async fn state(&self) -> Option<ChannelState> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(ChannelMessage::GetState { reply: tx })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok()
    }

    /// Stop the session and wait (bounded) for its capture to terminate.
    ///
    /// Returns `true` when the session acknowledged the stop — meaning any
    /// capture subprocess is no longer running — or was already gone.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(ChannelMessage::Stop { reply: tx })
            .await
            .is_err()
        {
            // Session already terminated; nothing left to stop.
            return true;
        }
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
    }
}

/// Settings a session needs, distilled from the application config.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub interval: Duration,
    pub quality: String,
    pub live_template: String,
    pub time_format: String,
    pub save_root: PathBuf,
    pub fallback_to_current_dir: bool,
    pub fallback_dir: PathBuf,
    pub storage_recovery_command: Option<String>,
    pub capture_command: String,
    pub stream_url_template: String,
    pub stop_grace: Duration,
    pub spawn_warn_threshold: u32,
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.interval(),
            quality: config.quality.clone(),
            live_template: config.live_filename_template.clone(),
            time_format: config.time_format.clone(),
            save_root: config.save_root_dir.clone(),
            fallback_to_current_dir: config.fallback_to_current_dir,
            fallback_dir: config.fallback_dir.clone(),
            storage_recovery_command: config.storage_recovery_command.clone(),
            capture_command: config.capture_command.clone(),
            stream_url_template: config.stream_url_template.clone(),
            stop_grace: config.stop_grace(),
            spawn_warn_threshold: config.spawn_warn_threshold,
        }
    }

    fn stream_url(&self, channel_id: &str) -> String {
        self.stream_url_template.replace("{channel_id}", channel_id)
    }
}

/// Live-stream details captured while in `LiveNotRecording`.
#[derive(Debug, Clone)]
struct PendingLive {
    title: String,
    started_at: Option<NaiveDateTime>,
}

/// The owned capture subprocess plus its session book-keeping.
struct ActiveCapture {
    process: Box<dyn CaptureProcess>,
    session: RecordingSession,
}

/// The per-channel actor.
pub struct ChannelSession {
    channel: Channel,
    config: SessionConfig,
    prober: Arc<dyn StatusProber>,
    launcher: Arc<dyn ProcessLauncher>,
    hub: Arc<NotificationHub>,
    mailbox: mpsc::Receiver<ChannelMessage>,
    cancel: CancellationToken,
    state: ChannelState,
    live: Option<PendingLive>,
    active: Option<ActiveCapture>,
    spawn_failures: u32,
    stall_reported: bool,
    storage_warned: bool,
    recovery_attempted: bool,
}

impl ChannelSession {
    pub fn new(
        channel: Channel,
        config: SessionConfig,
        prober: Arc<dyn StatusProber>,
        launcher: Arc<dyn ProcessLauncher>,
        hub: Arc<NotificationHub>,
        cancel: CancellationToken,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let session = Self {
            channel,
            config,
            prober,
            launcher,
            hub,
            mailbox: rx,
            cancel,
            state: ChannelState::Idle,
            live: None,
            active: None,
            spawn_failures: 0,
            stall_reported: false,
            storage_warned: false,
            recovery_attempted: false,
        };

        (session, SessionHandle { tx })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Run the session until stopped or cancelled.
    pub async fn run(mut self) {
        info!(channel = %self.channel.id, "channel session starting");

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                msg = self.mailbox.recv() => match msg {
                    Some(ChannelMessage::Stop { reply }) => {
                        self.force_stop("channel removed").await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(ChannelMessage::PollNow) => self.poll_once().await,
                    Some(ChannelMessage::GetState { reply }) => {
                        let _ = reply.send(self.state);
                    }
                    None => {
                        warn!(channel = %self.channel.id, "session mailbox closed");
                        break;
                    }
                },

                exit = Self::wait_capture(&mut self.active), if self.active.is_some() => {
                    self.on_capture_exit(exit).await;
                }

                _ = ticker.tick() => self.poll_once().await,

                _ = self.cancel.cancelled() => {
                    // Shutdown. Whether the capture dies with us is the
                    // launcher's kill_on_drop policy; the graceful path
                    // goes through a Stop message instead.
                    debug!(channel = %self.channel.id, "session cancelled");
                    break;
                }
            }
        }

        info!(channel = %self.channel.id, "channel session stopped");
    }

    async fn wait_capture(active: &mut Option<ActiveCapture>) -> std::io::Result<ProcessExit> {
        match active {
            Some(capture) => capture.process.wait().await,
            None => std::future::pending().await,
        }
    }

    /// One poll cycle: probe, then run the state transition check.
    async fn poll_once(&mut self) {
        let status = match self.prober.probe(&self.channel.id).await {
            Ok(status) => status,
            Err(e) => {
                // Unknown this tick. Never state-changing, never fatal.
                warn!(
                    channel = %self.channel.id,
                    error = %e,
                    "status probe failed, retrying next interval"
                );
                return;
            }
        };

        match self.state {
            ChannelState::Recording => {
                if !status.is_live() {
                    // Probes can report offline before the stream really
                    // ends; the capture process exit is authoritative.
                    debug!(
                        channel = %self.channel.id,
                        "probe reports offline while capture is still running"
                    );
                }
            }
            ChannelState::Idle | ChannelState::LiveNotRecording => match status {
                LiveStatus::Live(stream) => {
                    if self.state == ChannelState::Idle {
                        info!(
                            channel = %self.channel.id,
                            title = %stream.title,
                            "channel is live"
                        );
                        self.state = ChannelState::LiveNotRecording;
                    }
                    self.live = Some(PendingLive {
                        title: stream.title,
                        started_at: stream.started_at,
                    });
                    self.try_start_capture().await;
                }
                LiveStatus::Offline => {
                    if self.state == ChannelState::LiveNotRecording {
                        info!(
                            channel = %self.channel.id,
                            "channel went offline before capture could start"
                        );
                        self.state = ChannelState::Idle;
                        self.reset_live_state();
                    } else {
                        debug!(channel = %self.channel.id, "channel is offline");
                    }
                }
            },
        }
    }

    /// Attempt the LiveNotRecording → Recording transition.
    async fn try_start_capture(&mut self) {
        let Some(live) = self.live.clone() else {
            return;
        };

        let Some(output_dir) = self.resolve_output_dir().await else {
            return;
        };

        let now = Local::now();
        let escaped_title = truncate_title(&sanitize_filename(&live.title));
        let stream_started = live
            .started_at
            .unwrap_or_else(|| now.naive_local())
            .format(&self.config.time_format)
            .to_string();
        let record_started = now.format(&self.config.time_format).to_string();

        let file_name = match render_template(
            &self.config.live_template,
            &[
                ("username", self.channel.display_name.as_str()),
                ("stream_started", stream_started.as_str()),
                ("record_started", record_started.as_str()),
                ("escaped_title", escaped_title.as_str()),
            ],
        ) {
            Ok(name) => name,
            Err(e) => {
                // Templates are validated at config load; reaching this is
                // a bug, not a user error.
                error!(channel = %self.channel.id, error = %e, "filename template failed");
                return;
            }
        };

        let output_path = unique_path(&output_dir.join(file_name));

        let spec = CommandSpec::new(&self.config.capture_command)
            .arg(self.config.stream_url(&self.channel.id))
            .arg(&self.config.quality)
            .args(["-o".to_string(), output_path.to_string_lossy().into_owned()]);

        match self.launcher.launch(&spec).await {
            Ok(process) => {
                let session = RecordingSession {
                    channel_id: self.channel.id.clone(),
                    title: live.title.clone(),
                    output_path: output_path.clone(),
                    stream_started_at: live.started_at.and_then(local_naive_to_utc),
                    record_started_at: Utc::now(),
                };

                info!(
                    channel = %self.channel.id,
                    path = %output_path.display(),
                    "recording started"
                );

                self.state = ChannelState::Recording;
                self.spawn_failures = 0;
                self.stall_reported = false;

                self.hub.publish(NotificationEvent::RecordingStarted {
                    channel_id: self.channel.id.clone(),
                    channel_name: self.channel.display_name.clone(),
                    title: session.title.clone(),
                    output_path: session.output_path.to_string_lossy().into_owned(),
                    stream_started_at: session.stream_started_at,
                    record_started_at: session.record_started_at,
                });

                self.active = Some(ActiveCapture { process, session });
            }
            Err(e) => {
                self.spawn_failures += 1;
                warn!(
                    channel = %self.channel.id,
                    error = %e,
                    consecutive_failures = self.spawn_failures,
                    "capture spawn failed, will retry next interval"
                );

                if self.spawn_failures >= self.config.spawn_warn_threshold && !self.stall_reported
                {
                    self.stall_reported = true;
                    self.hub.publish(NotificationEvent::CaptureStalled {
                        channel_id: self.channel.id.clone(),
                        channel_name: self.channel.display_name.clone(),
                        consecutive_failures: self.spawn_failures,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }

    /// The capture subprocess exited on its own.
    async fn on_capture_exit(&mut self, exit: std::io::Result<ProcessExit>) {
        let Some(capture) = self.active.take() else {
            return;
        };

        match exit {
            Ok(exit) => info!(
                channel = %self.channel.id,
                code = ?exit.code,
                "capture process exited"
            ),
            Err(e) => warn!(
                channel = %self.channel.id,
                error = %e,
                "error waiting for capture process"
            ),
        }

        self.finish_session(capture.session).await;
    }

    /// Forced stop (channel removal or shutdown-with-stop).
    async fn force_stop(&mut self, reason: &str) {
        if let Some(mut capture) = self.active.take() {
            info!(channel = %self.channel.id, reason, "stopping capture");

            match capture.process.stop(self.config.stop_grace).await {
                Ok(exit) => debug!(
                    channel = %self.channel.id,
                    code = ?exit.code,
                    "capture process terminated"
                ),
                Err(e) => warn!(
                    channel = %self.channel.id,
                    error = %e,
                    "error terminating capture process"
                ),
            }

            self.finish_session(capture.session).await;
        } else if self.state != ChannelState::Idle {
            self.state = ChannelState::Idle;
            self.reset_live_state();
        }
    }

    /// Close out a recording session: exactly one `RecordingStopped` per
    /// entry into `Recording`, whatever ended it.
    async fn finish_session(&mut self, session: RecordingSession) {
        let duration_secs = (Utc::now() - session.record_started_at).num_milliseconds() as f64
            / 1000.0;

        let file_size_bytes = match tokio::fs::metadata(&session.output_path).await {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                warn!(
                    channel = %self.channel.id,
                    path = %session.output_path.display(),
                    error = %e,
                    "recorded file not found after capture exit"
                );
                None
            }
        };

        self.hub.publish(NotificationEvent::RecordingStopped {
            channel_id: self.channel.id.clone(),
            channel_name: self.channel.display_name.clone(),
            output_path: session.output_path.to_string_lossy().into_owned(),
            duration_secs,
            file_size_bytes,
            timestamp: Utc::now(),
        });

        self.state = ChannelState::Idle;
        self.reset_live_state();
    }

    fn reset_live_state(&mut self) {
        self.live = None;
        self.spawn_failures = 0;
        self.stall_reported = false;
        self.storage_warned = false;
        self.recovery_attempted = false;
    }

    /// Resolve the directory this channel records into, handling an
    /// unreachable save root: run the recovery command once per live
    /// session, re-check, then fall back or skip the tick.
    async fn resolve_output_dir(&mut self) -> Option<PathBuf> {
        let channel_dir = sanitize_filename(&self.channel.display_name);

        if !self.config.save_root.is_dir() {
            error!(
                channel = %self.channel.id,
                path = %self.config.save_root.display(),
                "save directory is unreachable"
            );

            if let Some(command) = self.config.storage_recovery_command.clone()
                && !self.recovery_attempted
            {
                self.recovery_attempted = true;
                self.run_recovery(&command).await;
            }
        }

        if self.config.save_root.is_dir() {
            let dir = self.config.save_root.join(&channel_dir);
            return match ensure_dir_all(&dir).await {
                Ok(()) => Some(dir),
                Err(e) => {
                    error!(channel = %self.channel.id, error = %e, "cannot create channel directory");
                    None
                }
            };
        }

        if !self.config.fallback_to_current_dir {
            error!(
                channel = %self.channel.id,
                "recording skipped: save directory unavailable and fallback is disabled"
            );
            return None;
        }

        let dir = self.config.fallback_dir.join(&channel_dir);
        if let Err(e) = ensure_dir_all(&dir).await {
            error!(channel = %self.channel.id, error = %e, "cannot create fallback directory");
            return None;
        }

        if !self.storage_warned {
            self.storage_warned = true;
            self.hub.publish(NotificationEvent::StorageFallback {
                channel_id: self.channel.id.clone(),
                channel_name: self.channel.display_name.clone(),
                output_dir: dir.to_string_lossy().into_owned(),
                timestamp: Utc::now(),
            });
        }

        Some(dir)
    }

    async fn run_recovery(&self, command: &str) {
        let Some(spec) = CommandSpec::parse(command) else {
            warn!("storage recovery command is empty");
            return;
        };

        info!(command, "running storage recovery command");

        match self.launcher.launch(&spec).await {
            Ok(mut process) => match tokio::time::timeout(RECOVERY_TIMEOUT, process.wait()).await
            {
                Ok(Ok(exit)) if exit.success() => info!("storage recovery command finished"),
                Ok(Ok(exit)) => warn!(code = ?exit.code, "storage recovery command failed"),
                Ok(Err(e)) => warn!(error = %e, "error waiting for storage recovery command"),
                Err(_) => {
                    warn!("storage recovery command timed out");
                    let _ = process.stop(Duration::from_secs(1)).await;
                }
            },
            Err(e) => warn!(error = %e, "failed to run storage recovery command"),
        }
    }
}

/// Interpret a platform-local timestamp as UTC, skipping ambiguous values.
fn local_naive_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationEvent;
    use crate::testkit::{
        EventCollector, FakeLauncher, ScriptedProber, ScriptedStatus, test_session_config,
    };

    fn test_channel() -> Channel {
        Channel::new("chan-1", "Streamer")
    }

    struct SessionUnderTest {
        handle: SessionHandle,
        launcher: Arc<FakeLauncher>,
        events: EventCollector,
        task: tokio::task::JoinHandle<()>,
        _dir: tempfile::TempDir,
    }

    fn spawn_session(
        statuses: Vec<ScriptedStatus>,
        launcher: FakeLauncher,
        tweak: impl FnOnce(&mut SessionConfig),
    ) -> SessionUnderTest {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_session_config(dir.path());
        tweak(&mut config);

        let prober = Arc::new(ScriptedProber::new(statuses));
        let launcher = Arc::new(launcher);
        let hub = Arc::new(NotificationHub::new());
        let events = EventCollector::new(&hub);

        let (session, handle) = ChannelSession::new(
            test_channel(),
            config,
            prober,
            launcher.clone(),
            hub,
            CancellationToken::new(),
        );
        let task = tokio::spawn(session.run());

        SessionUnderTest {
            handle,
            launcher,
            events,
            task,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_live_then_spawn_walks_to_recording() {
        let t = spawn_session(
            vec![ScriptedStatus::live("hello world")],
            FakeLauncher::new(),
            |_| {},
        );

        let event = t.events.next().await;
        let NotificationEvent::RecordingStarted {
            channel_id,
            title,
            output_path,
            ..
        } = &event
        else {
            panic!("expected RecordingStarted, got {}", event.kind());
        };
        assert_eq!(channel_id, "chan-1");
        assert_eq!(title, "hello world");
        assert!(output_path.contains("Streamer"));

        assert_eq!(t.handle.state().await, Some(ChannelState::Recording));

        // The capture was spawned with the stream URL, quality and -o path.
        let spawned = t.launcher.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].program, "fake-capture");
        assert!(spawned[0].args.contains(&"https://live.example/chan-1".to_string()));
        assert!(spawned[0].args.contains(&"best".to_string()));
        assert!(spawned[0].args.contains(&"-o".to_string()));

        t.task.abort();
    }

    #[tokio::test]
    async fn test_capture_exit_returns_to_idle_with_one_stopped_event() {
        let t = spawn_session(
            vec![ScriptedStatus::live("title"), ScriptedStatus::Offline],
            FakeLauncher::new(),
            |_| {},
        );

        t.events.next().await; // RecordingStarted

        t.launcher.finish_process(0, Some(0)).await;

        let event = t.events.next().await;
        assert!(matches!(event, NotificationEvent::RecordingStopped { .. }));
        assert_eq!(t.handle.state().await, Some(ChannelState::Idle));

        // Exactly one stop event, never a duplicate.
        t.events.assert_no_event().await;

        t.task.abort();
    }

    #[tokio::test]
    async fn test_probe_failures_change_nothing() {
        let t = spawn_session(
            vec![
                ScriptedStatus::Error,
                ScriptedStatus::Error,
                ScriptedStatus::Error,
            ],
            FakeLauncher::new(),
            |_| {},
        );

        // Let several poll cycles run.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(t.handle.state().await, Some(ChannelState::Idle));
        assert_eq!(t.launcher.spawned().len(), 0);
        t.events.assert_no_event().await;

        t.task.abort();
    }

    #[tokio::test]
    async fn test_offline_probe_does_not_stop_running_capture() {
        let t = spawn_session(
            vec![
                ScriptedStatus::live("title"),
                ScriptedStatus::Offline,
                ScriptedStatus::Offline,
                ScriptedStatus::Offline,
            ],
            FakeLauncher::new(),
            |_| {},
        );

        t.events.next().await; // RecordingStarted

        // Several offline probes later the capture is still running.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(t.handle.state().await, Some(ChannelState::Recording));
        assert!(t.launcher.process_alive(0));
        t.events.assert_no_event().await;

        // Only the process exit ends the session.
        t.launcher.finish_process(0, Some(0)).await;
        let event = t.events.next().await;
        assert!(matches!(event, NotificationEvent::RecordingStopped { .. }));

        t.task.abort();
    }

    #[tokio::test]
    async fn test_spawn_failures_retry_and_warn_once() {
        let launcher = FakeLauncher::new();
        launcher.fail_next_spawns(2);

        let t = spawn_session(
            vec![
                ScriptedStatus::live("t"),
                ScriptedStatus::live("t"),
                ScriptedStatus::live("t"),
            ],
            launcher,
            |config| config.spawn_warn_threshold = 2,
        );

        // First event is the stall warning after two consecutive failures.
        let event = t.events.next().await;
        let NotificationEvent::CaptureStalled {
            consecutive_failures,
            ..
        } = &event
        else {
            panic!("expected CaptureStalled, got {}", event.kind());
        };
        assert_eq!(*consecutive_failures, 2);

        // Third attempt succeeds; the session kept retrying.
        let event = t.events.next().await;
        assert!(matches!(event, NotificationEvent::RecordingStarted { .. }));
        assert_eq!(t.handle.state().await, Some(ChannelState::Recording));

        t.task.abort();
    }

    #[tokio::test]
    async fn test_offline_while_waiting_for_spawn_returns_to_idle() {
        let launcher = FakeLauncher::new();
        launcher.fail_next_spawns(10);

        let t = spawn_session(
            vec![ScriptedStatus::live("t"), ScriptedStatus::Offline],
            launcher,
            |config| config.spawn_warn_threshold = 99,
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(t.handle.state().await, Some(ChannelState::Idle));
        t.events.assert_no_event().await;

        t.task.abort();
    }

    #[tokio::test]
    async fn test_stop_terminates_capture_before_ack() {
        let t = spawn_session(
            vec![ScriptedStatus::live("title")],
            FakeLauncher::new(),
            |_| {},
        );

        t.events.next().await; // RecordingStarted
        assert!(t.launcher.process_alive(0));

        let acked = t.handle.stop(Duration::from_secs(5)).await;
        assert!(acked);

        // By the time the stop is acknowledged the process is gone.
        assert!(!t.launcher.process_alive(0));
        assert!(t.launcher.process_stopped(0));

        let event = t.events.next().await;
        assert!(matches!(event, NotificationEvent::RecordingStopped { .. }));
        t.events.assert_no_event().await;

        t.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_fallback_used_when_save_root_missing() {
        let t = spawn_session(
            vec![ScriptedStatus::live("title")],
            FakeLauncher::new(),
            |config| {
                config.save_root = config.save_root.join("does-not-exist");
            },
        );

        let event = t.events.next().await;
        let NotificationEvent::StorageFallback { output_dir, .. } = &event else {
            panic!("expected StorageFallback, got {}", event.kind());
        };
        assert!(output_dir.contains("fallback"));

        let event = t.events.next().await;
        let NotificationEvent::RecordingStarted { output_path, .. } = &event else {
            panic!("expected RecordingStarted, got {}", event.kind());
        };
        assert!(output_path.contains("fallback"));

        t.task.abort();
    }

    #[tokio::test]
    async fn test_recovery_command_runs_once_and_can_restore_root() {
        let launcher = FakeLauncher::new();
        launcher.auto_exit("remount", 0);

        let dir = tempfile::tempdir().unwrap();
        let restored_root = dir.path().join("restored");
        {
            let restored_root = restored_root.clone();
            launcher.on_launch(move |spec| {
                if spec.program == "remount" {
                    std::fs::create_dir_all(&restored_root).unwrap();
                }
            });
        }

        let mut config = test_session_config(dir.path());
        config.save_root = restored_root.clone();
        config.storage_recovery_command = Some("remount /mnt".to_string());

        let prober = Arc::new(ScriptedProber::new(vec![ScriptedStatus::live("t")]));
        let launcher = Arc::new(launcher);
        let hub = Arc::new(NotificationHub::new());
        let events = EventCollector::new(&hub);

        let (session, _handle) = ChannelSession::new(
            test_channel(),
            config,
            prober,
            launcher.clone(),
            hub,
            CancellationToken::new(),
        );
        let task = tokio::spawn(session.run());

        let event = events.next().await;
        let NotificationEvent::RecordingStarted { output_path, .. } = &event else {
            panic!("expected RecordingStarted, got {}", event.kind());
        };

        // The recovery command ran, and the recording went to the restored
        // save root rather than the fallback directory.
        assert!(
            launcher
                .spawned()
                .iter()
                .any(|spec| spec.program == "remount")
        );
        assert!(output_path.starts_with(restored_root.to_str().unwrap()));

        task.abort();
    }

    #[test]
    fn test_local_naive_to_utc_roundtrip() {
        let naive = NaiveDateTime::parse_from_str("2024-01-01 10:00:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        // The exact offset depends on the host timezone; the conversion
        // just has to be stable and non-panicking.
        assert!(local_naive_to_utc(naive).is_some());
    }
}
