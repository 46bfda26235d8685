//! Shared fakes for unit tests: a scripted status prober, a controllable
//! process launcher, and a notification collector.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::notify::{NotificationEvent, NotificationHub};
use crate::probe::{ChannelInfo, LiveStatus, LiveStream, ProbeError, StatusProber, VideoInfo};
use crate::recorder::launcher::{
    CaptureProcess, CommandSpec, ProcessExit, ProcessLauncher, SpawnError,
};
use crate::recorder::session::SessionConfig;

/// One scripted probe outcome.
#[derive(Debug, Clone)]
pub enum ScriptedStatus {
    Live { title: String },
    Offline,
    Error,
}

impl ScriptedStatus {
    pub fn live(title: &str) -> Self {
        Self::Live {
            title: title.to_string(),
        }
    }
}

/// Prober that plays back a fixed script of probe results, repeating the
/// final entry once the script is exhausted.
pub struct ScriptedProber {
    script: Mutex<VecDeque<ScriptedStatus>>,
    last: Mutex<Option<ScriptedStatus>>,
    channels: Mutex<HashMap<String, Option<ChannelInfo>>>,
    videos: Mutex<HashMap<String, VideoInfo>>,
    fail_channel_info: AtomicBool,
}

impl ScriptedProber {
    pub fn new(script: Vec<ScriptedStatus>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            videos: Mutex::new(HashMap::new()),
            fail_channel_info: AtomicBool::new(false),
        }
    }

    /// Mark a channel id as unknown to the platform.
    pub fn unknown_channel(&self, id: &str) {
        self.channels.lock().insert(id.to_string(), None);
    }

    /// Make `channel_info` fail with a transient error.
    pub fn fail_channel_info(&self) {
        self.fail_channel_info.store(true, Ordering::SeqCst);
    }

    /// Register VOD metadata for a URL.
    pub fn set_video(&self, url: &str, video: VideoInfo) {
        self.videos.lock().insert(url.to_string(), video);
    }

    fn next_status(&self) -> ScriptedStatus {
        let mut script = self.script.lock();
        match script.pop_front() {
            Some(status) => {
                *self.last.lock() = Some(status.clone());
                status
            }
            None => self.last.lock().clone().unwrap_or(ScriptedStatus::Offline),
        }
    }
}

fn scripted_stream_start() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2024-01-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

#[async_trait]
impl StatusProber for ScriptedProber {
    async fn probe(&self, _channel_id: &str) -> Result<LiveStatus, ProbeError> {
        match self.next_status() {
            ScriptedStatus::Live { title } => Ok(LiveStatus::Live(LiveStream {
                title,
                started_at: Some(scripted_stream_start()),
            })),
            ScriptedStatus::Offline => Ok(LiveStatus::Offline),
            ScriptedStatus::Error => Err(ProbeError::Decode("scripted probe failure".into())),
        }
    }

    async fn channel_info(&self, channel_id: &str) -> Result<Option<ChannelInfo>, ProbeError> {
        if self.fail_channel_info.load(Ordering::SeqCst) {
            return Err(ProbeError::Decode("scripted lookup failure".into()));
        }
        if let Some(entry) = self.channels.lock().get(channel_id) {
            return Ok(entry.clone());
        }
        Ok(Some(ChannelInfo {
            id: channel_id.to_string(),
            name: channel_id.to_uppercase(),
        }))
    }

    async fn video_info(&self, url: &str) -> Result<Option<VideoInfo>, ProbeError> {
        Ok(self.videos.lock().get(url).cloned())
    }
}

/// Control handle for one fake process.
struct FakeProcessController {
    exit_tx: Option<oneshot::Sender<ProcessExit>>,
    alive: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

type LaunchHook = Box<dyn Fn(&CommandSpec) + Send + Sync>;

/// Launcher producing controllable fake processes.
pub struct FakeLauncher {
    spawned: Mutex<Vec<CommandSpec>>,
    controllers: Mutex<Vec<FakeProcessController>>,
    fail_next: AtomicU32,
    auto_exit: Mutex<HashMap<String, i32>>,
    on_launch: Mutex<Option<LaunchHook>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            spawned: Mutex::new(Vec::new()),
            controllers: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
            auto_exit: Mutex::new(HashMap::new()),
            on_launch: Mutex::new(None),
        }
    }

    /// Make the next `n` launches fail with a spawn error.
    pub fn fail_next_spawns(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Processes for `program` exit immediately with `code`.
    pub fn auto_exit(&self, program: &str, code: i32) {
        self.auto_exit.lock().insert(program.to_string(), code);
    }

    /// Run a side effect on every successful launch.
    pub fn on_launch(&self, hook: impl Fn(&CommandSpec) + Send + Sync + 'static) {
        *self.on_launch.lock() = Some(Box::new(hook));
    }

    /// Every command spec launched so far, failed spawns excluded.
    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned.lock().clone()
    }

    pub fn process_alive(&self, index: usize) -> bool {
        self.controllers.lock()[index].alive.load(Ordering::SeqCst)
    }

    pub fn process_stopped(&self, index: usize) -> bool {
        self.controllers.lock()[index]
            .stopped
            .load(Ordering::SeqCst)
    }

    /// Make process `index` exit with the given code.
    pub async fn finish_process(&self, index: usize, code: Option<i32>) {
        let tx = self.controllers.lock()[index].exit_tx.take();
        if let Some(tx) = tx {
            let _ = tx.send(ProcessExit { code });
        }
        tokio::task::yield_now().await;
    }
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, spec: &CommandSpec) -> Result<Box<dyn CaptureProcess>, SpawnError> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(SpawnError::Io {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted failure"),
            });
        }

        if let Some(hook) = self.on_launch.lock().as_ref() {
            hook(spec);
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let stopped = Arc::new(AtomicBool::new(false));

        let mut controller = FakeProcessController {
            exit_tx: Some(exit_tx),
            alive: alive.clone(),
            stopped: stopped.clone(),
        };

        if let Some(code) = self.auto_exit.lock().get(&spec.program) {
            if let Some(tx) = controller.exit_tx.take() {
                let _ = tx.send(ProcessExit { code: Some(*code) });
            }
        }

        self.spawned.lock().push(spec.clone());
        self.controllers.lock().push(controller);

        Ok(Box::new(FakeProcess {
            exit_rx,
            alive,
            stopped,
        }))
    }
}

struct FakeProcess {
    exit_rx: oneshot::Receiver<ProcessExit>,
    alive: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl CaptureProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        self.alive.load(Ordering::SeqCst).then_some(4242)
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        match (&mut self.exit_rx).await {
            Ok(exit) => {
                self.alive.store(false, Ordering::SeqCst);
                Ok(exit)
            }
            // Controller dropped without finishing: behave like a process
            // that never exits.
            Err(_) => std::future::pending().await,
        }
    }

    async fn stop(&mut self, _grace: Duration) -> std::io::Result<ProcessExit> {
        self.alive.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        Ok(ProcessExit { code: Some(143) })
    }
}

/// Notification subscriber with assertion helpers.
pub struct EventCollector {
    rx: tokio::sync::Mutex<broadcast::Receiver<NotificationEvent>>,
}

impl EventCollector {
    pub fn new(hub: &NotificationHub) -> Self {
        Self {
            rx: tokio::sync::Mutex::new(hub.subscribe()),
        }
    }

    /// Next event, failing the test after a generous timeout.
    pub async fn next(&self) -> NotificationEvent {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a notification event")
            .expect("notification hub closed")
    }

    /// Assert that no further event arrives within a short window.
    pub async fn assert_no_event(&self) {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Err(_) => {}
            Ok(Ok(event)) => panic!("unexpected event: {}", event.kind()),
            Ok(Err(_)) => {}
        }
    }
}

/// Session settings tuned for fast tests, rooted in a temp directory.
pub fn test_session_config(dir: &Path) -> SessionConfig {
    let save_root = dir.join("recordings");
    std::fs::create_dir_all(&save_root).unwrap();

    SessionConfig {
        interval: Duration::from_millis(50),
        quality: "best".to_string(),
        live_template: "[{username}]{stream_started}_{escaped_title}.ts".to_string(),
        time_format: "%y-%m-%d %H_%M_%S".to_string(),
        save_root,
        fallback_to_current_dir: true,
        fallback_dir: dir.join("fallback_recordings"),
        storage_recovery_command: None,
        capture_command: "fake-capture".to_string(),
        stream_url_template: "https://live.example/{channel_id}".to_string(),
        stop_grace: Duration::from_secs(1),
        spawn_warn_threshold: 3,
    }
}
